//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! MessageMetadata + MessageCategory
//!     → pool.rs (lookup / build, keyed by ConnectionKey)
//!     → connection.rs (connect → [CONNECT tunnel] → [TLS handshake + verify])
//!     → transport.rs (plain TCP or TLS byte stream)
//!     → http layer (request serialization, response parsing)
//! ```
//!
//! # Design Decisions
//! - Connections are outbound only; the agent never listens
//! - TLS is optional per connection and handled transparently by the transport

pub mod connection;
pub mod key;
pub mod metadata;
pub mod pool;
pub mod tls;
pub mod transport;

pub use connection::{Connection, ConnectionId};
pub use key::{ConnectionKey, MessageCategory};
pub use metadata::{ClientAuth, ConnectionFlags, MessageConnectionConfig, MessageMetadata, ProxySettings};
pub use pool::ConnectionPool;
pub use transport::Transport;
