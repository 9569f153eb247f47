use crate::error::ApiError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Upper bound the server stores stock in (Int32)
pub const MAX_STOCK: i64 = 2_147_483_647;

/// Car identifier; the API has used both numeric and string ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CarId {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for CarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// A car record as returned by `GET /car`. Unknown attributes are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Car {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CarId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub make: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stock: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Field names owned by [`Car`] itself; never accepted as extra attributes
pub const RECORD_FIELDS: [&str; 4] = ["id", "make", "model", "stock"];

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Car {
    pub fn new(make: &str, model: &str, stock: i64) -> Self {
        Self {
            id: None,
            make: make.to_string(),
            model: model.to_string(),
            stock,
            extra: Map::new(),
        }
    }
}

/// Validate a stock value given as a JSON number or numeric string.
/// Returns the normalized integer.
pub fn validate_stock(value: &Value) -> Result<i64, ApiError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    let number = match number {
        Some(n) if n.is_finite() => n,
        _ => return Err(ApiError::Validation("Stock must be a valid number".to_string())),
    };

    if number.fract() != 0.0 {
        return Err(ApiError::Validation("Stock must be a whole number".to_string()));
    }
    if number < 0.0 || number > MAX_STOCK as f64 {
        return Err(ApiError::Validation(
            "Stock must be between 0 and 2,147,483,647".to_string(),
        ));
    }

    Ok(number as i64)
}

/// Validate and normalize the `stock` field of an update payload in place.
/// Absent or null stock is left alone.
pub fn normalize_stock(fields: &mut Map<String, Value>) -> Result<(), ApiError> {
    if let Some(stock) = fields.get("stock").filter(|v| !v.is_null()) {
        let stock = validate_stock(stock)?;
        fields.insert("stock".to_string(), Value::from(stock));
    }
    Ok(())
}

/// Parse `key=value` pairs into a JSON object. Values that parse as JSON
/// (numbers, booleans, quoted strings) keep their type; anything else is a string.
pub fn parse_fields<S: AsRef<str>>(pairs: &[S]) -> Result<Map<String, Value>, ApiError> {
    let mut fields = Map::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, raw) = pair.split_once('=').ok_or_else(|| {
            ApiError::Validation(format!("Expected key=value, got '{}'", pair))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ApiError::Validation(format!("Missing field name in '{}'", pair)));
        }
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::from(raw));
        fields.insert(key.to_string(), value);
    }
    Ok(fields)
}
