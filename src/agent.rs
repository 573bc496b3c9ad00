//! Interfaces to the rest of the agent.
//!
//! The messaging engine does not own the agent's identity or its on-disk
//! buffer. It reads identity through [`AgentDetails`] and hands failed
//! messages to a [`MessageBuffer`].

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::http::HttpMethod;
use crate::net::MessageCategory;

/// Identity and backend coordinates of the running agent.
pub trait AgentDetails: Send + Sync {
    /// Current bearer token, if the agent is registered.
    fn access_token(&self) -> Option<String>;

    fn fog_domain(&self) -> Option<String>;

    fn fog_port(&self) -> Option<u16>;

    fn fog_secure(&self) -> bool;

    /// Directory of the system's trusted CA certificates.
    fn openssl_dir(&self) -> Option<String>;

    fn service_name(&self) -> String;
}

/// Config-backed [`AgentDetails`] whose token can be rotated at runtime.
pub struct StaticAgentDetails {
    access_token: ArcSwapOption<String>,
    fog_domain: Option<String>,
    fog_port: Option<u16>,
    fog_secure: bool,
    openssl_dir: Option<String>,
    service_name: String,
}

impl StaticAgentDetails {
    pub fn from_config(config: &AgentConfig) -> Self {
        let fog_domain = Some(config.fog_domain.clone()).filter(|d| !d.is_empty());
        Self {
            access_token: ArcSwapOption::from(config.access_token.clone().map(Arc::new)),
            fog_port: fog_domain.as_ref().map(|_| config.fog_port),
            fog_domain,
            fog_secure: config.fog_secure,
            openssl_dir: config.openssl_dir.clone(),
            service_name: config.service_name.clone(),
        }
    }

    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        self.set_access_token(token);
        self
    }

    pub fn with_fog(mut self, domain: impl Into<String>, port: u16, secure: bool) -> Self {
        self.fog_domain = Some(domain.into());
        self.fog_port = Some(port);
        self.fog_secure = secure;
        self
    }

    pub fn set_access_token(&self, token: impl Into<String>) {
        self.access_token.store(Some(Arc::new(token.into())));
    }
}

impl Default for StaticAgentDetails {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

impl AgentDetails for StaticAgentDetails {
    fn access_token(&self) -> Option<String> {
        self.access_token.load_full().map(|token| token.as_ref().clone())
    }

    fn fog_domain(&self) -> Option<String> {
        self.fog_domain.clone()
    }

    fn fog_port(&self) -> Option<u16> {
        self.fog_port
    }

    fn fog_secure(&self) -> bool {
        self.fog_secure
    }

    fn openssl_dir(&self) -> Option<String> {
        self.openssl_dir.clone()
    }

    fn service_name(&self) -> String {
        self.service_name.clone()
    }
}

/// A request that could not be delivered and should be retried later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub method: String,
    pub uri: String,
    pub body: String,
    pub category: MessageCategory,
}

impl BufferedMessage {
    pub fn new(method: HttpMethod, uri: &str, body: &str, category: MessageCategory) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            body: body.to_string(),
            category,
        }
    }
}

/// Sink for undeliverable messages.
pub trait MessageBuffer: Send + Sync {
    fn push(&self, message: BufferedMessage);
}

/// In-memory [`MessageBuffer`], used by the CLI and tests.
#[derive(Debug, Default)]
pub struct MemoryBuffer {
    messages: Mutex<Vec<BufferedMessage>>,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything buffered so far.
    pub fn drain(&self) -> Vec<BufferedMessage> {
        match self.messages.lock() {
            Ok(mut messages) => std::mem::take(&mut *messages),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl MessageBuffer for MemoryBuffer {
    fn push(&self, message: BufferedMessage) {
        tracing::debug!(uri = %message.uri, category = ?message.category, "Buffering message");
        match self.messages.lock() {
            Ok(mut messages) => messages.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_rotation_is_visible() {
        let agent = StaticAgentDetails::default();
        assert_eq!(agent.access_token(), None);
        agent.set_access_token("first");
        assert_eq!(agent.access_token().as_deref(), Some("first"));
        agent.set_access_token("second");
        assert_eq!(agent.access_token().as_deref(), Some("second"));
    }

    #[test]
    fn fog_coordinates_require_a_domain() {
        let agent = StaticAgentDetails::default();
        assert_eq!(agent.fog_domain(), None);
        assert_eq!(agent.fog_port(), None);

        let config = AgentConfig {
            fog_domain: "fog.example.com".to_string(),
            fog_port: 8443,
            ..AgentConfig::default()
        };
        let agent = StaticAgentDetails::from_config(&config);
        assert_eq!(agent.fog_domain().as_deref(), Some("fog.example.com"));
        assert_eq!(agent.fog_port(), Some(8443));
        assert!(agent.fog_secure());
    }

    #[test]
    fn memory_buffer_drains() {
        let buffer = MemoryBuffer::new();
        buffer.push(BufferedMessage::new(HttpMethod::Post, "/logs", "{}", MessageCategory::Log));
        assert_eq!(buffer.drain().len(), 1);
        assert!(buffer.drain().is_empty());
    }
}
