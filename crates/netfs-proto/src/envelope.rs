//! Response envelope.
//!
//! Every response body is `{"status", "error", "data"}`:
//!
//! - success: `status = "success"`, `error = null`, `data` is the payload
//!   (or null for operations without one)
//! - failure: `status = "error"`, `error` is a message, `data = null`
//!
//! Failures also carry a `code` naming the error category so the client can
//! pick an errno without parsing the message.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorCode, FsError, FsResult};

/// Envelope status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Response envelope. Fields are private so the status/error/data
/// relationship can only be built through [`Envelope::success`] and
/// [`Envelope::failure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    status: Status,
    error: Option<String>,
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<ErrorCode>,
}

impl Envelope {
    /// Wrap a successful payload. `()` becomes `data: null`.
    pub fn success<T: Serialize>(payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            status: Status::Success,
            error: None,
            data: serde_json::to_value(payload)?,
            code: None,
        })
    }

    /// Wrap a failure message with its category.
    pub fn failure(message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            status: Status::Error,
            error: Some(message.into()),
            data: Value::Null,
            code: Some(code),
        }
    }

    /// Wrap a backend error.
    pub fn from_error(err: &FsError) -> Self {
        Self::failure(err.to_string(), err.code())
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn code(&self) -> Option<ErrorCode> {
        self.code
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Unwrap into the typed payload, or the error the envelope carries.
    ///
    /// A received envelope whose status and error disagree is a protocol
    /// error. A success with `data: null` decodes as `T` from null, which
    /// works for `()` and fails for payload types.
    pub fn into_result<T: DeserializeOwned>(self) -> FsResult<T> {
        match (self.status, self.error) {
            (Status::Success, None) => serde_json::from_value(self.data)
                .map_err(|e| FsError::Protocol(format!("bad response payload: {e}"))),
            (Status::Error, Some(message)) if self.data.is_null() => {
                Err(FsError::from_wire(self.code, message))
            }
            (status, _) => Err(FsError::Protocol(format!(
                "malformed envelope with status {status:?}"
            ))),
        }
    }
}
