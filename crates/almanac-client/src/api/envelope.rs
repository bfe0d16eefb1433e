//! Uniform response envelope and failure classification.

#![allow(missing_docs)]

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ClientError, Result, GENERIC_FAILURE};

/// Message fragments that mark an "insufficient permission" failure when the
/// server sends no structured code.
const PERMISSION_KEYWORDS: &[&str] = &["权限", "permission"];

/// Structured failure codes understood by the controller.
pub mod failure_codes {
    pub const PERMISSION_DENIED: &str = "permission_denied";
    pub const FORBIDDEN: &str = "forbidden";
    pub const ACCOUNT_EXPIRED: &str = "account_expired";
    pub const UNAUTHENTICATED: &str = "unauthenticated";
    pub const SESSION_EXPIRED: &str = "session_expired";
}

/// `{ success, data?, message?, code?, ... }` as sent by every endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    /// Session endpoints carry the identity here instead of in `data`.
    #[serde(default)]
    pub user: Option<Value>,
    #[serde(default)]
    pub already_running: Option<bool>,
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Framework error bodies (`{"detail": ...}`) on non-2xx responses.
    #[serde(default)]
    pub detail: Option<Value>,
}

impl Envelope {
    /// Interprets a raw HTTP answer.
    ///
    /// Non-2xx answers with a JSON body are turned into failure envelopes so
    /// they go through the same classification; anything else is a transport
    /// failure.
    pub fn from_http(status: u16, body: &str) -> Result<Self> {
        let ok = (200..300).contains(&status);
        let parsed = serde_json::from_str::<Envelope>(body);
        match (ok, parsed) {
            (true, Ok(envelope)) => Ok(envelope),
            (true, Err(err)) => Err(ClientError::Decode(err.to_string())),
            (false, Ok(mut envelope)) => {
                if envelope.message.is_none() {
                    envelope.message = envelope.detail.as_ref().map(detail_text);
                }
                if envelope.message.is_none() && envelope.code.is_none() {
                    return Err(ClientError::Transport(format!("HTTP {status}")));
                }
                envelope.success = false;
                if envelope.code.is_none() {
                    envelope.code = match status {
                        401 => Some(failure_codes::UNAUTHENTICATED.to_string()),
                        403 => Some(failure_codes::FORBIDDEN.to_string()),
                        _ => None,
                    };
                }
                Ok(envelope)
            }
            (false, Err(_)) => Err(ClientError::Transport(format!("HTTP {status}"))),
        }
    }

    /// `Ok(self)` on success, otherwise the classified failure.
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(self.failure())
        }
    }

    /// Classifies a failed envelope: the structured code first, then the
    /// message keyword fallback.
    #[must_use]
    pub fn failure(&self) -> ClientError {
        let message = self
            .message
            .clone()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| GENERIC_FAILURE.to_string());
        match self.code.as_deref() {
            Some(failure_codes::PERMISSION_DENIED | failure_codes::FORBIDDEN) => {
                ClientError::PermissionDenied { message }
            }
            Some(failure_codes::ACCOUNT_EXPIRED) => ClientError::AccountExpired { message },
            Some(failure_codes::UNAUTHENTICATED | failure_codes::SESSION_EXPIRED) => {
                ClientError::Unauthenticated { message }
            }
            Some(code) => ClientError::Rejected {
                code: Some(code.to_string()),
                message,
            },
            None if mentions_permission(&message) => ClientError::PermissionDenied { message },
            None => ClientError::Rejected {
                code: None,
                message,
            },
        }
    }

    /// Decodes the `data` payload.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T> {
        let Some(data) = self.data.clone() else {
            return Err(ClientError::Decode("missing data payload".into()));
        };
        serde_json::from_value(data).map_err(|err| ClientError::Decode(err.to_string()))
    }

    /// Decodes the `data` payload, treating an absent or null payload as the default.
    pub fn data_or_default<T: DeserializeOwned + Default>(&self) -> Result<T> {
        match &self.data {
            None | Some(Value::Null) => Ok(T::default()),
            Some(_) => self.data(),
        }
    }

    /// Decodes the `user` payload.
    pub fn user<T: DeserializeOwned>(&self) -> Result<T> {
        let Some(user) = self.user.clone().filter(|value| !value.is_null()) else {
            return Err(ClientError::Decode("missing user payload".into()));
        };
        serde_json::from_value(user).map_err(|err| ClientError::Decode(err.to_string()))
    }

    #[must_use]
    pub fn message_or(&self, fallback: &str) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }
}

fn detail_text(detail: &Value) -> String {
    match detail {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Keyword fallback for servers that do not send a failure code.
#[must_use]
pub fn mentions_permission(message: &str) -> bool {
    let lowered = message.to_lowercase();
    PERMISSION_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}
