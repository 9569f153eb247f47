//! REST client for the car inventory API.
//!
//! Every authenticated call checks the session token locally first (present and
//! unexpired) and never hits the network without one. A 401/403 from the server
//! clears the token. Either way the caller gets `ApiError::Unauthenticated` and
//! is expected to route the user to the login view; this module never navigates.

use crate::car::{self, Car};
use crate::error::ApiError;
use crate::session::SessionStore;
use crate::token;
use crate::transport::{ApiRequest, ApiResponse, Method, Transport};
use serde_json::{json, Map, Value};
use std::rc::Rc;
use tracing::{debug, warn};

/// Response fields a login token may arrive in, in priority order
const TOKEN_FIELDS: &[&str] = &["token", "jwt", "access_token"];

pub struct ApiClient<T: Transport> {
    transport: T,
    session: Rc<SessionStore>,
}

impl<T: Transport> ApiClient<T> {
    pub fn new(transport: T, session: Rc<SessionStore>) -> Self {
        Self { transport, session }
    }

    pub fn session(&self) -> &Rc<SessionStore> {
        &self.session
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.send_authenticated(Method::Get, path, None)
    }

    pub fn post(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.send_authenticated(Method::Post, path, Some(body))
    }

    pub fn put(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        self.send_authenticated(Method::Put, path, Some(body))
    }

    pub fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.send_authenticated(Method::Delete, path, None)
    }

    /// POST without a bearer token (login)
    pub fn post_public(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        let response = self.transport.send(&ApiRequest {
            method: Method::Post,
            path: path.to_string(),
            body: Some(body),
            bearer: None,
        })?;
        self.handle_response(response)
    }

    fn send_authenticated(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let token = self.require_token()?;
        let response = self.transport.send(&ApiRequest {
            method,
            path: path.to_string(),
            body,
            bearer: Some(token),
        })?;
        self.handle_response(response)
    }

    /// Current token if present and unexpired; otherwise evict it
    fn require_token(&self) -> Result<String, ApiError> {
        match self.session.token() {
            Some(token) if token::is_valid(&token) => Ok(token),
            Some(_) => {
                warn!("stored token is malformed or expired; clearing it");
                self.evict();
                Err(ApiError::Unauthenticated)
            }
            None => Err(ApiError::Unauthenticated),
        }
    }

    fn evict(&self) {
        if let Err(e) = self.session.clear_token() {
            warn!(error = %e, "failed to remove stored token");
        }
    }

    fn handle_response(&self, response: ApiResponse) -> Result<Value, ApiError> {
        if response.status == 401 || response.status == 403 {
            debug!(status = response.status, "server rejected credentials");
            self.evict();
            return Err(ApiError::Unauthenticated);
        }

        if !response.is_success() {
            return Err(ApiError::Server {
                status: response.status,
                message: compose_error_message(response.status, &response.body),
            });
        }

        parse_body(&response.body)
    }

    /// Log in and store the returned token
    pub fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let data = self.post_public(
            "/login",
            json!({ "username": username, "password": password }),
        )?;
        let token = extract_token(&data).ok_or(ApiError::MissingToken)?;
        self.session.set_token(Some(token))?;
        Ok(())
    }

    /// Register a new account, then log in with the same credentials
    pub fn register_and_login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let response = self.transport.send(&ApiRequest {
            method: Method::Post,
            path: "/register".to_string(),
            body: Some(json!({ "username": username, "password": password })),
            bearer: None,
        })?;

        if !response.is_success() {
            return Err(ApiError::Server {
                status: response.status,
                message: compose_register_error(response.status, &response.body),
            });
        }

        self.login(username, password)
    }

    pub fn logout(&self) -> Result<(), ApiError> {
        self.session.clear_token()?;
        Ok(())
    }

    pub fn get_all_cars(&self) -> Result<Vec<Car>, ApiError> {
        match self.get("/car")? {
            Value::Object(map) if map.is_empty() => Ok(Vec::new()),
            value => serde_json::from_value(value)
                .map_err(|e| ApiError::UnexpectedShape(e.to_string())),
        }
    }

    /// Add a car. Stock is range-checked on the serialized record.
    pub fn add_car(&self, car: &Car) -> Result<Value, ApiError> {
        let mut record = serde_json::to_value(car)?;
        if let Value::Object(fields) = &mut record {
            car::normalize_stock(fields)?;
        }
        self.post("/car", record)
    }

    /// Update a car. A `stock` field is validated locally before sending.
    pub fn update_car(&self, id: &str, mut fields: Map<String, Value>) -> Result<Value, ApiError> {
        car::normalize_stock(&mut fields)?;
        self.put(&format!("/car/{}", id), Value::Object(fields))
    }

    pub fn delete_car(&self, id: &str) -> Result<Value, ApiError> {
        self.delete(&format!("/car/{}", id))
    }
}

/// Empty body → `{}`, otherwise JSON
fn parse_body(body: &str) -> Result<Value, ApiError> {
    if body.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    Ok(serde_json::from_str(body)?)
}

fn extract_token(data: &Value) -> Option<String> {
    TOKEN_FIELDS
        .iter()
        .filter_map(|field| data.get(*field).and_then(Value::as_str))
        .find(|token| !token.is_empty())
        .map(str::to_string)
}

/// Messages for one field of an `errors` map, whether a list or a single value
fn field_messages(value: &Value) -> Vec<String> {
    let text = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match value {
        Value::Array(items) => items.iter().map(text).collect(),
        other => vec![text(other)],
    }
}

/// Pull a human-readable message out of an error body, mapping each field of an
/// `errors` map through `describe`. `None` when the body has neither shape.
fn structured_message(body: &str, describe: impl Fn(&str, &[String]) -> String) -> Option<String> {
    let data: Value = serde_json::from_str(body).ok()?;

    if let Some(errors) = data.get("errors").and_then(Value::as_object) {
        let lines: Vec<String> = errors
            .iter()
            .map(|(field, value)| describe(field, &field_messages(value)))
            .collect();
        return Some(lines.join("\n"));
    }

    match data.get("message")? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn raw_fallback(prefix: &str, status: u16, body: &str) -> String {
    if body.trim().is_empty() {
        format!("{} with status {}", prefix, status)
    } else {
        format!("{}: {}", prefix, body.trim())
    }
}

/// Compose the error message for a failed API call
pub fn compose_error_message(status: u16, body: &str) -> String {
    structured_message(body, |field, messages| {
        let joined = messages.join(", ");
        if field == "stock" {
            if joined.contains("Int32") {
                return "Stock must be a whole number between 0 and 2,147,483,647".to_string();
            }
            if joined.contains("format") {
                return "Stock must be a valid number".to_string();
            }
        }
        format!("{}: {}", field, joined)
    })
    .unwrap_or_else(|| raw_fallback("Request failed", status, body))
}

/// Compose the error message for a failed registration
pub fn compose_register_error(status: u16, body: &str) -> String {
    structured_message(body, |field, messages| {
        if field == "username" && messages.iter().any(|m| m == "Username already exists") {
            return "This username is already taken. Please choose another one.".to_string();
        }
        messages.join(", ")
    })
    .unwrap_or_else(|| raw_fallback("Registration failed", status, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KeyValueStore, MemoryStore, TOKEN_KEY};
    use crate::token::testing::token_expiring_in;
    use crate::transport::testing::MockTransport;
    use std::cell::RefCell;

    fn client(transport: MockTransport) -> (ApiClient<MockTransport>, MemoryStore) {
        let store = MemoryStore::new();
        let session = Rc::new(SessionStore::open(Box::new(store.clone())));
        (ApiClient::new(transport, session), store)
    }

    fn logged_in(transport: MockTransport) -> ApiClient<MockTransport> {
        let (client, _) = client(transport);
        client
            .session()
            .set_token(Some(token_expiring_in(3600)))
            .unwrap();
        client
    }

    #[test]
    fn test_get_attaches_bearer_token() {
        let api = logged_in(MockTransport::new().respond(200, r#"{"ok":true}"#));
        let token = api.session().token().unwrap();

        let value = api.get("/car").unwrap();
        assert_eq!(value, json!({ "ok": true }));

        let requests = api.transport().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(requests[0].path, "/car");
        assert_eq!(requests[0].bearer, Some(token));
        assert_eq!(requests[0].body, None);
    }

    #[test]
    fn test_empty_success_body_is_empty_object() {
        let api = logged_in(MockTransport::new().respond(204, "").respond(200, "  \n"));
        assert_eq!(api.delete("/car/1").unwrap(), json!({}));
        assert_eq!(api.get("/car").unwrap(), json!({}));
    }

    #[test]
    fn test_invalid_json_success_body_is_decode_error() {
        let api = logged_in(MockTransport::new().respond(200, "<html>"));
        assert!(matches!(api.get("/car"), Err(ApiError::Decode(_))));
    }

    #[test]
    fn test_no_token_fails_without_sending() {
        let (api, _) = client(MockTransport::new());
        assert!(api.get("/car").unwrap_err().is_unauthenticated());
        assert!(api.transport().requests().is_empty());
    }

    #[test]
    fn test_expired_token_cleared_without_sending() {
        let (api, store) = client(MockTransport::new());
        api.session()
            .set_token(Some(token_expiring_in(-60)))
            .unwrap();

        assert!(api.get("/car").unwrap_err().is_unauthenticated());
        assert!(api.transport().requests().is_empty());
        assert_eq!(api.session().token(), None);
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_401_clears_token_and_notifies() {
        let api = logged_in(MockTransport::new().respond(401, ""));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = api.session().subscribe(move |present| sink.borrow_mut().push(present));

        assert!(api.get("/car").unwrap_err().is_unauthenticated());
        assert_eq!(api.session().token(), None);
        assert_eq!(*seen.borrow(), vec![false]);
    }

    #[test]
    fn test_403_clears_token() {
        let api = logged_in(MockTransport::new().respond(403, r#"{"message":"forbidden"}"#));
        assert!(api.delete("/car/3").unwrap_err().is_unauthenticated());
        assert!(!api.session().is_logged_in());
    }

    #[test]
    fn test_server_error_uses_message_field() {
        let api = logged_in(MockTransport::new().respond(500, r#"{"message":"Database down"}"#));
        match api.get("/car").unwrap_err() {
            ApiError::Server { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "Database down");
            }
            other => panic!("unexpected {:?}", other),
        }
        // Non-auth failures keep the session
        assert!(api.session().is_logged_in());
    }

    #[test]
    fn test_compose_stock_format_error() {
        let msg = compose_error_message(422, r#"{"errors":{"stock":["format"]}}"#);
        assert!(msg.contains("Stock must be a valid number"));
    }

    #[test]
    fn test_compose_stock_int32_error() {
        let msg = compose_error_message(
            400,
            r#"{"errors":{"stock":["The value could not be converted to System.Int32."]}}"#,
        );
        assert_eq!(msg, "Stock must be a whole number between 0 and 2,147,483,647");
    }

    #[test]
    fn test_compose_multiple_fields_one_line_each() {
        let msg = compose_error_message(
            400,
            r#"{"errors":{"make":["Required","Too short"],"model":"Required"}}"#,
        );
        let lines: Vec<&str> = msg.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.contains(&"make: Required, Too short"));
        assert!(lines.contains(&"model: Required"));
    }

    #[test]
    fn test_compose_falls_back_to_raw_text() {
        assert_eq!(
            compose_error_message(502, "Bad Gateway"),
            "Request failed: Bad Gateway"
        );
        assert_eq!(
            compose_error_message(500, r#"{"detail":"x"}"#),
            r#"Request failed: {"detail":"x"}"#
        );
        assert_eq!(compose_error_message(500, ""), "Request failed with status 500");
    }

    #[test]
    fn test_compose_register_username_taken() {
        let msg = compose_register_error(
            400,
            r#"{"errors":{"username":["Username already exists"]}}"#,
        );
        assert_eq!(msg, "This username is already taken. Please choose another one.");

        let other = compose_register_error(400, r#"{"errors":{"password":["Too short","Needs a digit"]}}"#);
        assert_eq!(other, "Too short, Needs a digit");

        assert_eq!(
            compose_register_error(500, "oops"),
            "Registration failed: oops"
        );
    }

    #[test]
    fn test_login_with_access_token_field() {
        let (api, store) = client(MockTransport::new().respond(200, r#"{"access_token":"abc"}"#));
        api.login("u", "p").unwrap();

        assert_eq!(api.session().token(), Some("abc".to_string()));
        assert!(api.session().is_logged_in());
        assert_eq!(store.get(TOKEN_KEY).unwrap(), Some("abc".to_string()));

        let requests = api.transport().requests();
        assert_eq!(requests[0].path, "/login");
        assert_eq!(requests[0].bearer, None);
        assert_eq!(requests[0].body, Some(json!({ "username": "u", "password": "p" })));
    }

    #[test]
    fn test_login_token_field_priority() {
        let (api, _) = client(
            MockTransport::new().respond(200, r#"{"access_token":"c","jwt":"b","token":"a"}"#),
        );
        api.login("u", "p").unwrap();
        assert_eq!(api.session().token(), Some("a".to_string()));
    }

    #[test]
    fn test_login_without_token_fails() {
        let (api, _) = client(MockTransport::new().respond(200, r#"{"user":"u"}"#));
        assert!(matches!(api.login("u", "p"), Err(ApiError::MissingToken)));
        assert!(!api.session().is_logged_in());
    }

    #[test]
    fn test_login_bad_credentials_is_unauthenticated() {
        let (api, _) = client(MockTransport::new().respond(401, ""));
        assert!(api.login("u", "wrong").unwrap_err().is_unauthenticated());
    }

    #[test]
    fn test_register_then_login() {
        let (api, _) = client(
            MockTransport::new()
                .respond(201, "")
                .respond(200, r#"{"token":"fresh"}"#),
        );
        api.register_and_login("new", "pw").unwrap();

        let paths: Vec<String> = api.transport().requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/register", "/login"]);
        assert_eq!(api.session().token(), Some("fresh".to_string()));
    }

    #[test]
    fn test_register_taken_does_not_login() {
        let (api, _) = client(MockTransport::new().respond(
            409,
            r#"{"errors":{"username":["Username already exists"]}}"#,
        ));
        let err = api.register_and_login("taken", "pw").unwrap_err();
        assert_eq!(
            err.to_string(),
            "This username is already taken. Please choose another one."
        );
        assert_eq!(api.transport().requests().len(), 1);
    }

    #[test]
    fn test_register_connection_failure() {
        let (api, _) = client(MockTransport::new().fail(ApiError::Connect));
        let err = api.register_and_login("u", "p").unwrap_err();
        assert_eq!(err.to_string(), "Unable to connect to the server. Please try again later.");
    }

    #[test]
    fn test_update_car_rejects_bad_stock_locally() {
        let api = logged_in(MockTransport::new());
        for stock in [json!(-1), json!(2147483648i64)] {
            let fields = json!({ "stock": stock }).as_object().unwrap().clone();
            assert!(matches!(
                api.update_car("1", fields),
                Err(ApiError::Validation(_))
            ));
        }
        assert!(api.transport().requests().is_empty());
    }

    #[test]
    fn test_update_car_sends_normalized_stock() {
        let api = logged_in(MockTransport::new().respond(200, r#"{"id":1,"stock":42}"#));
        let fields = json!({ "stock": 42 }).as_object().unwrap().clone();
        api.update_car("1", fields).unwrap();

        let requests = api.transport().requests();
        assert_eq!(requests[0].method, Method::Put);
        assert_eq!(requests[0].path, "/car/1");
        assert_eq!(requests[0].body, Some(json!({ "stock": 42 })));
    }

    #[test]
    fn test_get_all_cars() {
        let api = logged_in(MockTransport::new().respond(
            200,
            r#"[{"id":1,"make":"Volvo","model":"240","stock":4},{"id":"b2","make":"Fiat","model":"Uno","stock":0}]"#,
        ));
        let cars = api.get_all_cars().unwrap();
        assert_eq!(cars.len(), 2);
        assert_eq!(cars[0].make, "Volvo");
        assert_eq!(cars[1].id.as_ref().unwrap().to_string(), "b2");
    }

    #[test]
    fn test_get_all_cars_empty_body() {
        let api = logged_in(MockTransport::new().respond(200, ""));
        assert!(api.get_all_cars().unwrap().is_empty());
    }

    #[test]
    fn test_add_and_delete_car() {
        let api = logged_in(
            MockTransport::new()
                .respond(201, r#"{"id":9,"make":"Skoda","model":"Octavia","stock":2}"#)
                .respond(204, ""),
        );
        let created = api.add_car(&Car::new("Skoda", "Octavia", 2)).unwrap();
        assert_eq!(created["id"], json!(9));
        api.delete_car("9").unwrap();

        let requests = api.transport().requests();
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(
            requests[0].body,
            Some(json!({ "make": "Skoda", "model": "Octavia", "stock": 2 }))
        );
        assert_eq!(requests[1].method, Method::Delete);
        assert_eq!(requests[1].path, "/car/9");
    }

    #[test]
    fn test_logout_clears_token() {
        let api = logged_in(MockTransport::new());
        api.logout().unwrap();
        assert!(!api.session().is_logged_in());
    }
}
