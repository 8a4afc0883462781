//! Requests served by the node and the responses it produces.
//!
//! The HTTP front end lives outside the core: it only hands over the method,
//! the path and the raw query of each request and writes back the
//! [`Response`] it receives.

use alloc::borrow::Cow;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

/// Content type of plain-text responses.
pub const TEXT_PLAIN: &str = "text/plain";

/// Content type of `JSON` responses.
pub const APPLICATION_JSON: &str = "application/json";

/// Request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// Any other method.
    Other,
}

impl Method {
    /// Maps a method name onto a [`Method`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("GET") {
            Self::Get
        } else {
            Self::Other
        }
    }
}

/// An incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    /// Request method.
    pub method: Method,
    /// Request path.
    pub path: &'a str,
    /// Raw query string, without the leading `?`.
    pub query: &'a str,
}

impl<'a> Request<'a> {
    /// Creates a `GET` [`Request`].
    #[must_use]
    pub const fn get(path: &'a str) -> Self {
        Self {
            method: Method::Get,
            path,
            query: "",
        }
    }

    /// Sets the raw query string.
    #[must_use]
    pub const fn query(mut self, query: &'a str) -> Self {
        self.query = query;
        self
    }

    /// Sets the request method.
    #[must_use]
    pub const fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Returns the route, that is the path without trailing slashes.
    #[must_use]
    pub fn route(&self) -> &'a str {
        let route = self.path.trim_end_matches('/');
        if route.is_empty() { "/" } else { route }
    }

    /// Returns the percent-decoded value of the first query argument called
    /// `name`.
    ///
    /// `+` is decoded as a space. Malformed escapes are kept as they are.
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<Cow<'a, str>> {
        self.query
            .split('&')
            .filter_map(|pair| match pair.split_once('=') {
                Some((key, value)) => Some((key, value)),
                None if !pair.is_empty() => Some((pair, "")),
                None => None,
            })
            .find(|(key, _)| *key == name)
            .map(|(_, value)| percent_decode(value))
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn percent_decode(value: &str) -> Cow<'_, str> {
    if !value.contains(['%', '+']) {
        return Cow::Borrowed(value);
    }

    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'+' => decoded.push(b' '),
            b'%' => {
                let escape = bytes
                    .get(index + 1)
                    .copied()
                    .and_then(hex_value)
                    .zip(bytes.get(index + 2).copied().and_then(hex_value));
                if let Some((high, low)) = escape {
                    decoded.push((high << 4) | low);
                    index += 2;
                } else {
                    decoded.push(b'%');
                }
            }
            byte => decoded.push(byte),
        }
        index += 1;
    }

    match String::from_utf8(decoded) {
        Ok(text) => Cow::Owned(text),
        Err(e) => Cow::Owned(String::from_utf8_lossy(e.as_bytes()).into_owned()),
    }
}

/// A response to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// `HTTP` status code.
    pub status: u16,
    /// Content type of the body.
    pub content_type: &'static str,
    /// Response body.
    pub body: String,
}

impl Response {
    /// Creates a `200` plain-text [`Response`].
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self::with_status(200, TEXT_PLAIN, body)
    }

    /// Creates a `200` `JSON` [`Response`].
    #[must_use]
    pub fn json(body: impl Into<String>) -> Self {
        Self::with_status(200, APPLICATION_JSON, body)
    }

    /// Creates a `400` [`Response`] describing invalid input.
    #[must_use]
    pub fn bad_request(description: impl Into<String>) -> Self {
        Self::with_status(400, TEXT_PLAIN, description)
    }

    /// Creates a `404` [`Response`] for an unknown route.
    #[must_use]
    pub fn not_found(route: &str) -> Self {
        let mut body = "Not found: ".to_string();
        body.push_str(route);
        body.push('\n');
        Self::with_status(404, TEXT_PLAIN, body)
    }

    /// Creates a `405` [`Response`].
    #[must_use]
    pub fn not_allowed() -> Self {
        Self::with_status(405, TEXT_PLAIN, "Method not allowed\n")
    }

    /// Creates a `500` [`Response`] for a body that could not be produced.
    #[must_use]
    pub fn internal(description: impl Into<String>) -> Self {
        Self::with_status(500, TEXT_PLAIN, description)
    }

    /// Checks whether the response reports a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    fn with_status(status: u16, content_type: &'static str, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }
}
