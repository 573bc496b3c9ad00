//! Outbound messaging engine for a security agent.
//!
//! Sends HTTP/1.1 requests to a management backend and arbitrary hosts over
//! plain TCP, TLS, or an HTTP proxy tunnel, with pooled persistent
//! connections, per-step timeouts, one retry per request and self-healing
//! suspension of failing connections.

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod messaging;
pub mod net;
pub mod observability;
pub mod resilience;

pub use agent::{AgentDetails, BufferedMessage, MemoryBuffer, MessageBuffer, StaticAgentDetails};
pub use config::MessagingConfig;
pub use context::MessagingContext;
pub use error::{MessagingError, ProtocolError, TimeoutKind, TlsError};
pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpResponseParser, HttpStatusCode};
pub use messaging::{FogConnectionStatus, Messaging};
pub use net::{Connection, ConnectionKey, ConnectionPool, MessageCategory, MessageConnectionConfig, MessageMetadata};
