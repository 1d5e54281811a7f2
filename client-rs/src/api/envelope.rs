//! Response envelope shared by every API endpoint

use crate::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};

/// `{ success, data?, error?, message? }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: None,
        }
    }

    /// Server-provided explanation, `error` first
    pub fn failure_text(&self) -> Option<&str> {
        self.error.as_deref().or(self.message.as_deref())
    }

    /// Flatten into the payload, treating `success: false` as an error.
    pub fn into_result(self) -> ApiResult<T> {
        if !self.success {
            let text = self
                .failure_text()
                .unwrap_or("request was not successful")
                .to_string();
            return Err(ApiError::Rejected(text));
        }
        self.data
            .ok_or_else(|| ApiError::Decode("envelope has no data".to_string()))
    }
}

/// `data` of a successful login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginData {
    pub token: String,

    /// User record as returned by the backend; opaque to the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<serde_json::Value>,
}

/// `data` of a successful renewal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshData {
    pub token: String,
}
