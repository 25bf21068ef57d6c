//! Errors reported to requesting peers and to API callers.

use std::fmt;

/// Domain token for request-level protocol errors.
pub const REQUEST_ERROR_DOMAIN: &str = "request-error";
/// Domain token for user-related errors.
pub const USER_ERROR_DOMAIN: &str = "user-error";
/// Domain token for frame parse errors.
pub const PARSE_ERROR_DOMAIN: &str = "parse-error";

pub const CODE_NO_SUCH_ATTRIBUTE: u32 = 1;
pub const CODE_INVALID_ATTRIBUTE: u32 = 2;
pub const CODE_NOT_AUTHORIZED: u32 = 3;
pub const CODE_INVALID_NUMBER: u32 = 4;
pub const CODE_NAME_IN_USE: u32 = 1;

/// A recoverable per-request error, carried on the wire inside a
/// `request-failed` frame and returned from server-initiated joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    domain: &'static str,
    code: u32,
    message: String,
}

impl RequestError {
    /// Build an error in an arbitrary domain. Session validators use this to
    /// report their own error kinds; the proxy propagates them verbatim.
    pub fn new(domain: &'static str, code: u32, message: impl Into<String>) -> Self {
        Self {
            domain,
            code,
            message: message.into(),
        }
    }

    pub fn no_such_attribute(attribute: &str) -> Self {
        Self::new(
            REQUEST_ERROR_DOMAIN,
            CODE_NO_SUCH_ATTRIBUTE,
            format!("Request does not contain required attribute \"{attribute}\""),
        )
    }

    pub fn invalid_attribute(message: impl Into<String>) -> Self {
        Self::new(REQUEST_ERROR_DOMAIN, CODE_INVALID_ATTRIBUTE, message)
    }

    pub fn not_authorized() -> Self {
        Self::new(
            REQUEST_ERROR_DOMAIN,
            CODE_NOT_AUTHORIZED,
            "Permission denied",
        )
    }

    pub fn name_in_use(name: &str) -> Self {
        Self::new(
            USER_ERROR_DOMAIN,
            CODE_NAME_IN_USE,
            format!("Name \"{name}\" already in use"),
        )
    }

    pub fn invalid_number(attribute: &str, value: &str) -> Self {
        Self::new(
            PARSE_ERROR_DOMAIN,
            CODE_INVALID_NUMBER,
            format!("Attribute \"{attribute}\" has invalid number \"{value}\""),
        )
    }

    pub fn domain(&self) -> &'static str {
        self.domain
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.message, self.domain, self.code)
    }
}

impl std::error::Error for RequestError {}

/// Precondition failures of [`SessionProxy::subscribe_to`].
///
/// [`SessionProxy::subscribe_to`]: crate::SessionProxy::subscribe_to
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    #[error("connection is already subscribed")]
    AlreadySubscribed,
    #[error("session is not running")]
    SessionNotRunning,
}

/// Precondition failures of [`SessionProxy::unsubscribe`].
///
/// [`SessionProxy::unsubscribe`]: crate::SessionProxy::unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UnsubscribeError {
    #[error("connection is not subscribed")]
    NotSubscribed,
    #[error("session is not running")]
    SessionNotRunning,
}
