use crate::constants::limits::ERROR_BODY_SNIPPET_BYTES;
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidParams,
    Crypto,
    KeyUnavailable,
    RegistryIo,
    NotFound,
    Decrypt,
    CorruptData,
    Persist,
    Transport,
    Remote,
    PartialFailure,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteFailure {
    pub status: u16,
    #[serde(skip)]
    pub body: Vec<u8>,
}

fn body_snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= ERROR_BODY_SNIPPET_BYTES {
        return text.into_owned();
    }
    let mut end = ERROR_BODY_SNIPPET_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[derive(Debug, Clone, Serialize)]
pub struct KenshoError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteFailure>,
    pub retryable: bool,
}

impl KenshoError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            remote: None,
            retryable: false,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, "INVALID_PARAMS", message)
    }

    pub fn crypto(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Crypto, "CRYPTO", message)
    }

    pub fn key_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::KeyUnavailable, "KEY_UNAVAILABLE", message)
    }

    pub fn registry_io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RegistryIo, "REGISTRY_IO", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, "NOT_FOUND", message)
    }

    pub fn decrypt(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decrypt, "DECRYPT", message).with_hint(
            "The stored secret could not be authenticated with the current master key. Re-enter the credentials for this host.",
        )
    }

    pub fn corrupt_data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CorruptData, "CORRUPT_DATA", message)
    }

    pub fn persist(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persist, "PERSIST", message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, "TRANSPORT", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, "TIMEOUT", message).with_retryable(true)
    }

    pub fn remote(status: u16, body: Vec<u8>) -> Self {
        let snippet = body_snippet(&body);
        let mut err = Self::new(
            ErrorKind::Remote,
            "REMOTE",
            format!("Remote service returned status {}: {}", status, snippet),
        )
        .with_retryable(status >= 500);
        err.remote = Some(RemoteFailure { status, body });
        err
    }

    pub fn partial_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PartialFailure, "PARTIAL_FAILURE", message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn status(&self) -> Option<u16> {
        self.remote.as_ref().map(|remote| remote.status)
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.remote.as_ref().map(|remote| remote.body.as_slice())
    }
}

impl fmt::Display for KenshoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for KenshoError {}

impl From<std::io::Error> for KenshoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => KenshoError::timeout(err.to_string()),
            _ => KenshoError::transport(err.to_string()),
        }
    }
}
