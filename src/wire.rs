//! XML element frames exchanged within a session's subscription group.
//!
//! The substrate treats frames as structured elements, not text: a frame is
//! an element name, an ordered attribute list, and child elements. The
//! session engine owns the vocabulary of its own frames; this module owns
//! the elements the proxy reads and emits.

use std::fmt;

use crate::error::RequestError;
use crate::user::UserStatus;

// Proxy-owned inbound elements.
pub const USER_JOIN: &str = "user-join";
pub const SESSION_UNSUBSCRIBE: &str = "session-unsubscribe";

// Elements emitted by the proxy.
pub const USER_REJOIN: &str = "user-rejoin";
pub const USER_STATUS_CHANGE: &str = "user-status-change";
pub const SESSION_CLOSE: &str = "session-close";
pub const REQUEST_FAILED: &str = "request-failed";

pub const ATTR_SEQ: &str = "seq";
pub const ATTR_ID: &str = "id";
pub const ATTR_NAME: &str = "name";
pub const ATTR_STATUS: &str = "status";
pub const ATTR_DOMAIN: &str = "domain";
pub const ATTR_CODE: &str = "code";
pub const ATTR_MESSAGE: &str = "message";

/// A single XML element frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Xml {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Xml>,
}

impl Xml {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set an attribute, replacing any previous value of the same name.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(attr) = self.attrs.iter_mut().find(|(n, _)| n == name) {
            attr.1 = value;
        } else {
            self.attrs.push((name.to_string(), value));
        }
    }

    pub fn set_attr_u32(&mut self, name: &str, value: u32) {
        self.set_attr(name, value.to_string());
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Read an unsigned numeric attribute. Absence is `Ok(None)`; a value
    /// that does not parse is a protocol error.
    pub fn attr_u32(&self, name: &str) -> Result<Option<u32>, RequestError> {
        match self.attr(name) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<u32>()
                .map(Some)
                .map_err(|_| RequestError::invalid_number(name, raw)),
        }
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn add_child(&mut self, child: Xml) {
        self.children.push(child);
    }

    pub fn children(&self) -> &[Xml] {
        &self.children
    }
}

impl fmt::Display for Xml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.name)?;
        for (name, value) in &self.attrs {
            write!(f, " {}=\"{}\"", name, escape(value))?;
        }
        if self.children.is_empty() {
            write!(f, "/>")
        } else {
            write!(f, ">")?;
            for child in &self.children {
                write!(f, "{child}")?;
            }
            write!(f, "</{}>", self.name)
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Build the `user-status-change` frame broadcast when a departing
/// connection takes its users with it.
pub fn user_status_change(user_id: u32, status: UserStatus) -> Xml {
    let mut frame = Xml::new(USER_STATUS_CHANGE);
    frame.set_attr_u32(ATTR_ID, user_id);
    frame.set_attr(ATTR_STATUS, status.as_wire());
    frame
}

/// Build the `session-close` frame sent to a peer on graceful unsubscribe.
pub fn session_close() -> Xml {
    Xml::new(SESSION_CLOSE)
}

/// Build a `request-failed` reply for a rejected proxy-owned request.
pub fn request_failed(error: &RequestError, seq: Option<&str>) -> Xml {
    let mut frame = Xml::new(REQUEST_FAILED);
    frame.set_attr(ATTR_DOMAIN, error.domain());
    frame.set_attr_u32(ATTR_CODE, error.code());
    frame.set_attr(ATTR_MESSAGE, error.message());
    if let Some(seq) = seq {
        frame.set_attr(ATTR_SEQ, seq);
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PARSE_ERROR_DOMAIN;

    #[test]
    fn set_attr_replaces_existing_value() {
        let mut frame = Xml::new("test");
        frame.set_attr("a", "1");
        frame.set_attr("a", "2");
        assert_eq!(frame.attr("a"), Some("2"));
        assert_eq!(frame.attrs().count(), 1);
    }

    #[test]
    fn attr_u32_distinguishes_absent_from_malformed() {
        let frame = Xml::new("test").with_attr("seq", "borked");
        assert_eq!(Xml::new("test").attr_u32("seq"), Ok(None));
        let err = frame.attr_u32("seq").unwrap_err();
        assert_eq!(err.domain(), PARSE_ERROR_DOMAIN);
    }

    #[test]
    fn display_renders_attributes_and_children() {
        let mut frame = Xml::new("outer").with_attr("name", "a<b");
        frame.add_child(Xml::new("inner"));
        assert_eq!(frame.to_string(), "<outer name=\"a&lt;b\"><inner/></outer>");
    }

    #[test]
    fn request_failed_carries_error_and_seq() {
        let error = RequestError::not_authorized();
        let frame = request_failed(&error, Some("7/3"));
        assert_eq!(frame.name(), REQUEST_FAILED);
        assert_eq!(frame.attr(ATTR_DOMAIN), Some("request-error"));
        assert_eq!(frame.attr(ATTR_CODE), Some("3"));
        assert_eq!(frame.attr(ATTR_SEQ), Some("7/3"));
    }
}
