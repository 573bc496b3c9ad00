//! HTTP/1.1 request building.
//!
//! # Responsibilities
//! - Request line, with absolute-form URIs when routed through a proxy
//! - Bearer token attachment for backend-bound requests
//! - Protocol headers (Host, Content-Length, ...) and proxy headers
//! - Deterministic wire serialization (headers sorted by name)

use std::collections::BTreeMap;

use base64::Engine;

use crate::agent::AgentDetails;
use crate::error::MessagingError;
use crate::net::{ConnectionKey, ProxySettings};

/// Body marker of an agent registration request, which must go out without a token.
const REGISTRATION_MARKER: &str = r#""authenticationMethod": "token""#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Put,
    Delete,
    Connect,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Connect => "CONNECT",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PATCH" => Ok(HttpMethod::Patch),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "CONNECT" => Ok(HttpMethod::Connect),
            other => Err(MessagingError::Config(format!("unsupported HTTP method '{other}'"))),
        }
    }
}

/// What the builder needs to know about the connection a request will travel on.
#[derive(Debug, Clone, Copy)]
pub struct RequestTarget<'a> {
    pub key: &'a ConnectionKey,
    pub proxy: Option<&'a ProxySettings>,
    pub unsecure: bool,
    /// Externally supplied `Authorization` value, used instead of the agent token.
    pub credential: Option<&'a str>,
    /// Attach `Authorization` at all.
    pub send_access_token: bool,
}

/// A request ready for serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    method: HttpMethod,
    request_line: String,
    headers: BTreeMap<String, String>,
    body: String,
}

impl HttpRequest {
    /// Build a request for `target`.
    ///
    /// Fails with [`MessagingError::Auth`] when a bearer token is required but
    /// the agent has none.
    pub fn prepare(
        target: &RequestTarget<'_>,
        agent: &dyn AgentDetails,
        method: HttpMethod,
        uri: &str,
        headers: &BTreeMap<String, String>,
        body: &str,
    ) -> Result<Self, MessagingError> {
        let mut req = Self {
            method,
            request_line: String::new(),
            headers: headers.clone(),
            body: body.to_string(),
        };

        let external_host = req.has_header("Host");
        if external_host {
            tracing::trace!("Request is not for the fog");
        }
        let skip_token = !target.send_access_token
            || external_host
            || method == HttpMethod::Connect
            || body.contains(REGISTRATION_MARKER);
        req.add_access_token(target, agent, skip_token)?;
        req.set_connection_headers(target, uri);

        if let Some(proxy) = target.proxy {
            req.add_proxy_headers(proxy, target.unsecure || method == HttpMethod::Connect);
        }

        Ok(req)
    }

    /// The CONNECT request that opens a tunnel to `key` through `proxy`.
    pub fn connect(key: &ConnectionKey, proxy: &ProxySettings) -> Self {
        let mut req = Self {
            method: HttpMethod::Connect,
            request_line: String::new(),
            headers: BTreeMap::new(),
            body: String::new(),
        };
        let target = RequestTarget {
            key,
            proxy: Some(proxy),
            unsecure: true,
            credential: None,
            send_access_token: false,
        };
        req.set_connection_headers(&target, "");
        req.add_proxy_headers(proxy, true);
        req
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn insert_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Wire format: request line, headers in name order, blank line, body.
    pub fn to_wire(&self) -> String {
        let mut out = String::with_capacity(self.request_line.len() + self.body.len() + 256);
        out.push_str(&self.request_line);
        out.push_str("\r\n");
        for (key, value) in &self.headers {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }

    fn has_header(&self, key: &str) -> bool {
        self.header(key).is_some()
    }

    fn add_access_token(
        &mut self,
        target: &RequestTarget<'_>,
        agent: &dyn AgentDetails,
        skip: bool,
    ) -> Result<(), MessagingError> {
        if skip || self.has_header("Authorization") {
            return Ok(());
        }

        if let Some(credential) = target.credential.filter(|c| !c.is_empty()) {
            self.insert_header("Authorization", credential);
            return Ok(());
        }

        match agent.access_token() {
            Some(token) if !token.is_empty() => {
                self.insert_header("Authorization", format!("Bearer {token}"));
                Ok(())
            }
            _ => Err(MessagingError::Auth("Access token is missing.".to_string())),
        }
    }

    fn set_connection_headers(&mut self, target: &RequestTarget<'_>, uri: &str) {
        let mut host = target.key.host().to_string();

        self.request_line = match self.method {
            HttpMethod::Connect => {
                host = format!("{}:{}", target.key.host(), target.key.port());
                format!("CONNECT {host} HTTP/1.1")
            }
            method => {
                let prefix = if target.proxy.is_some() {
                    format!("http://{host}")
                } else {
                    String::new()
                };
                format!("{method} {prefix}{uri} HTTP/1.1")
            }
        };

        if !self.has_header("Host") {
            self.insert_header("Host", host);
        }
        self.insert_header("Content-Length", self.body.len().to_string());
        self.insert_header("Content-Type", "application/json");
        self.insert_header("Accept-Encoding", "identity");
        if !self.has_header("Connection") {
            self.insert_header("Connection", "keep-alive");
        }
    }

    /// Proxy credentials are only visible to the proxy on unsecured hops and on
    /// the CONNECT request itself.
    /// CONNECT carries them even when the tunnelled target is TLS; agents that
    /// only sent them on unsecured connections behave differently here.
    fn add_proxy_headers(&mut self, proxy: &ProxySettings, expose_credentials: bool) {
        self.insert_header("Accept", "*/*");
        self.insert_header("Proxy-Connection", "Keep-Alive");

        if !expose_credentials {
            return;
        }
        match proxy.auth() {
            Some(auth) if !auth.is_empty() => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(auth.as_bytes());
                self.insert_header("Proxy-Authorization", format!("Basic {encoded}"));
            }
            _ => tracing::trace!("No proxy authentication was set"),
        }
    }
}
