//! Action dispatch: route guard → API client → navigator.

use crate::api::ApiClient;
use crate::car::{self, Car};
use crate::error::ApiError;
use crate::guard::{Navigator, RouteGuard, View};
use crate::session::Subscription;
use crate::token;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::rc::Rc;

/// A user action, from the shell or a one-shot subcommand
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Login { username: String, password: String },
    Register { username: String, password: String },
    Logout,
    Status,
    ListCars,
    AddCar(Car),
    UpdateCar { id: String, fields: Map<String, Value> },
    DeleteCar { id: String },
}

impl Action {
    pub fn view(&self) -> View {
        match self {
            Self::Login { .. } | Self::Logout | Self::Status => View::Login,
            Self::Register { .. } => View::Register,
            Self::ListCars | Self::AddCar(_) | Self::UpdateCar { .. } | Self::DeleteCar { .. } => {
                View::Cars
            }
        }
    }

    /// Build an update, validating stock before anything is sent
    pub fn update(id: &str, pairs: &[String]) -> Result<Self, ApiError> {
        let mut fields = car::parse_fields(pairs)?;
        if fields.is_empty() {
            return Err(ApiError::Validation("Nothing to update".to_string()));
        }
        car::normalize_stock(&mut fields)?;
        Ok(Self::UpdateCar {
            id: id.to_string(),
            fields,
        })
    }

    /// Build a new car from make, model, stock and extra `key=value` pairs
    pub fn add(make: &str, model: &str, stock: &str, extra: &[String]) -> Result<Self, ApiError> {
        let stock = car::validate_stock(&Value::from(stock))?;
        let extra = car::parse_fields(extra)?;
        if let Some(key) = car::RECORD_FIELDS.iter().find(|k| extra.contains_key(**k)) {
            return Err(ApiError::Validation(format!(
                "'{}' is set positionally and cannot be passed as key=value",
                key
            )));
        }
        let mut car = Car::new(make, model, stock);
        car.extra = extra;
        Ok(Self::AddCar(car))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub logged_in: bool,
    pub token_valid: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub view: View,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done(String),
    Status(SessionStatus),
    Cars(Vec<Car>),
    Record(Value),
}

pub struct App<T: Transport> {
    api: ApiClient<T>,
    navigator: Rc<dyn Navigator>,
    _watch: Subscription,
}

impl<T: Transport> App<T> {
    pub fn new(api: ApiClient<T>, navigator: Rc<dyn Navigator>) -> Self {
        let watch = RouteGuard::watch(api.session(), Rc::clone(&navigator));
        Self {
            api,
            navigator,
            _watch: watch,
        }
    }

    #[cfg(test)]
    pub fn api(&self) -> &ApiClient<T> {
        &self.api
    }

    /// Re-check the current view against the session (keep-alive check)
    pub fn check_session(&self) -> View {
        let current = self.navigator.current();
        let view = RouteGuard::resolve(self.api.session(), current);
        if view != current {
            self.navigator.navigate(view);
        }
        view
    }

    pub fn run(&self, action: Action) -> Result<Outcome, ApiError> {
        let result = self.dispatch(action);
        if let Err(e) = &result {
            if e.is_unauthenticated() && self.navigator.current() != View::Login {
                self.navigator.navigate(View::Login);
            }
        }
        result
    }

    fn dispatch(&self, action: Action) -> Result<Outcome, ApiError> {
        let view = action.view();
        if view.is_protected() && RouteGuard::enter(self.api.session(), &*self.navigator, view) != view
        {
            return Err(ApiError::Unauthenticated);
        }

        match action {
            Action::Login { username, password } => {
                self.api.login(&username, &password)?;
                self.navigator.navigate(View::Cars);
                Ok(Outcome::Done(format!("Logged in as {}", username)))
            }
            Action::Register { username, password } => {
                self.api.register_and_login(&username, &password)?;
                self.navigator.navigate(View::Cars);
                Ok(Outcome::Done(format!("Registered and logged in as {}", username)))
            }
            Action::Logout => {
                self.api.logout()?;
                if self.navigator.current() != View::Login {
                    self.navigator.navigate(View::Login);
                }
                Ok(Outcome::Done("Logged out".to_string()))
            }
            Action::Status => {
                let session = self.api.session();
                let token = session.token();
                Ok(Outcome::Status(SessionStatus {
                    logged_in: session.is_logged_in(),
                    token_valid: session.has_valid_token(),
                    expires_at: token.as_deref().and_then(token::expires_at),
                    view: self.navigator.current(),
                }))
            }
            Action::ListCars => Ok(Outcome::Cars(self.api.get_all_cars()?)),
            Action::AddCar(car) => Ok(Outcome::Record(self.api.add_car(&car)?)),
            Action::UpdateCar { id, fields } => Ok(Outcome::Record(self.api.update_car(&id, fields)?)),
            Action::DeleteCar { id } => {
                self.api.delete_car(&id)?;
                Ok(Outcome::Done(format!("Deleted car {}", id)))
            }
        }
    }
}
