//! Provider error taxonomy.
//!
//! Authentication failures are fatal. Everything else the transport reports is
//! wrapped as retryable; retry policy belongs to the caller. Malformed model
//! output is never an error here.

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("provider request failed{}: {message}", status_suffix(.status))]
    Retryable {
        status: Option<u16>,
        message: String,
    },
    #[error("provider misconfigured: {0}")]
    Config(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl LlmError {
    /// Classify a non-success HTTP response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            format!("http status {status}")
        } else {
            body.trim().to_string()
        };
        match status {
            401 | 403 => LlmError::Auth(message),
            _ => LlmError::Retryable {
                status: Some(status),
                message,
            },
        }
    }

    /// Error object delivered inside an otherwise successful stream.
    pub(crate) fn in_band(message: impl Into<String>) -> Self {
        LlmError::Retryable {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Retryable { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, LlmError::Auth(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        match e.status().map(|s| s.as_u16()) {
            Some(code @ (401 | 403)) => LlmError::Auth(format!("http status {code}: {e}")),
            status => LlmError::Retryable {
                status,
                message: e.to_string(),
            },
        }
    }
}
