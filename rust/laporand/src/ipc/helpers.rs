use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::AppState;
use crate::model::User;
use crate::store::Store;
use crate::workflow::auth::Session;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }
}

impl From<AppError> for HandlerErr {
    fn from(e: AppError) -> Self {
        let details = match &e {
            AppError::LockedOut { retry_after_secs } => {
                Some(json!({ "retryAfterSecs": retry_after_secs }))
            }
            _ => None,
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

pub fn reply(id: &str, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent and `null` are both `None`; any other non-string is rejected.
pub fn optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T, HandlerErr> {
    let v = if params.is_null() {
        json!({})
    } else {
        params.clone()
    };
    serde_json::from_value(v).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

pub fn store(state: &AppState) -> Result<Store, HandlerErr> {
    if let Some(s) = &state.store {
        return Ok(s.clone());
    }
    match &state.store_error {
        Some(reason) => Err(AppError::StorageUnavailable(reason.clone()).into()),
        None => Err(HandlerErr {
            code: "no_workspace",
            message: "select a workspace first".to_string(),
            details: None,
        }),
    }
}

pub fn require_session(state: &AppState) -> Result<&Session, HandlerErr> {
    state
        .session
        .as_ref()
        .ok_or_else(|| AppError::NotAuthenticated.into())
}

pub fn require_admin(state: &AppState) -> Result<(), HandlerErr> {
    match require_session(state)? {
        Session::Admin => Ok(()),
        Session::Student(_) => {
            Err(AppError::Forbidden("administrator session required".to_string()).into())
        }
    }
}

pub fn require_student(state: &AppState) -> Result<User, HandlerErr> {
    match require_session(state)? {
        Session::Student(user) => Ok(user.clone()),
        Session::Admin => Err(AppError::Forbidden("student session required".to_string()).into()),
    }
}
