//! The `{success, message, data}` envelope every command replies with

use crate::error::{NotFound, Outcome};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Response<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn not_found(missing: &NotFound) -> Self {
        Self::failure(missing.to_string())
    }

    pub fn from_outcome(outcome: Outcome<T>) -> Self {
        match outcome {
            Outcome::Done(data) => Self::success(data),
            Outcome::NotFound(missing) => Self::not_found(&missing),
        }
    }
}
