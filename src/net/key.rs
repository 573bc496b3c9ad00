//! Pool keys.

use serde::{Deserialize, Serialize};

/// Traffic class of a message. Each class gets its own connection to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageCategory {
    Generic,
    Log,
    Debug,
    Metric,
    Intelligence,
}

impl std::fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageCategory::Generic => "generic",
            MessageCategory::Log => "log",
            MessageCategory::Debug => "debug",
            MessageCategory::Metric => "metric",
            MessageCategory::Intelligence => "intelligence",
        };
        f.write_str(name)
    }
}

/// Identity of a pooled connection.
///
/// Ordering is lexicographic over (host, port, category).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionKey {
    host: String,
    port: u16,
    category: MessageCategory,
}

impl ConnectionKey {
    pub fn new(host: impl Into<String>, port: u16, category: MessageCategory) -> Self {
        Self {
            host: host.into(),
            port,
            category,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn category(&self) -> MessageCategory {
        self.category
    }
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_host_then_port_then_category() {
        let mut keys = vec![
            ConnectionKey::new("b.example.com", 80, MessageCategory::Generic),
            ConnectionKey::new("a.example.com", 443, MessageCategory::Log),
            ConnectionKey::new("a.example.com", 443, MessageCategory::Generic),
            ConnectionKey::new("a.example.com", 80, MessageCategory::Metric),
        ];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "a.example.com:80 (metric)",
                "a.example.com:443 (generic)",
                "a.example.com:443 (log)",
                "b.example.com:80 (generic)",
            ]
        );
    }

    #[test]
    fn equality_requires_all_fields() {
        let key = ConnectionKey::new("fog", 443, MessageCategory::Log);
        assert_eq!(key, ConnectionKey::new("fog", 443, MessageCategory::Log));
        assert_ne!(key, ConnectionKey::new("fog", 443, MessageCategory::Debug));
        assert_ne!(key, ConnectionKey::new("fog", 80, MessageCategory::Log));
    }
}
