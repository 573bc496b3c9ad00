//! Parsed HTTP response.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::http::HttpStatusCode;

/// A complete response: status, lower-cased headers and body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: HttpStatusCode,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpResponse {
    /// A response without headers, used for locally generated failures.
    pub fn new(status: HttpStatusCode, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_headers(status: HttpStatusCode, body: Vec<u8>, headers: HashMap<String, String>) -> Self {
        Self { status, headers, body }
    }

    pub fn status(&self) -> HttpStatusCode {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Header lookup; keys are stored lower-cased.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }
}

impl std::fmt::Display for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = if self.body.is_empty() {
            Cow::Borrowed("{}")
        } else {
            self.body_text()
        };
        write!(f, "[Status-code]: {}, [Body]: {}", self.status, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let res = HttpResponse::new(HttpStatusCode::Ok, b"my-test".to_vec());
        assert_eq!(res.to_string(), "[Status-code]: 200 - HTTP_OK, [Body]: my-test");

        let empty = HttpResponse::new(HttpStatusCode::NoContent, Vec::new());
        assert_eq!(empty.to_string(), "[Status-code]: 204 - HTTP_NO_CONTENT, [Body]: {}");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("retry-after".to_string(), "30".to_string());
        let res = HttpResponse::with_headers(HttpStatusCode::TooManyRequests, Vec::new(), headers);
        assert_eq!(res.header("Retry-After"), Some("30"));
        assert_eq!(res.header("content-length"), None);
    }
}
