//! Persistent connection pool.
//!
//! # Responsibilities
//! - Build and establish connections from message metadata
//! - Keep persistent connections keyed by (host, port, category)
//! - Evict connections whose last exchange left them unusable
//!
//! # Design Decisions
//! - A connection is pooled even when its first establish fails, so later
//!   callers find it and it can heal through `is_suspended()`
//! - One-time backend connections are never pooled
//! - The map lock is held only for lookups and inserts, never across `.await`

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::context::MessagingContext;
use crate::error::MessagingError;
use crate::http::{HttpRequest, HttpResponse};
use crate::net::connection::Connection;
use crate::net::key::{ConnectionKey, MessageCategory};
use crate::net::metadata::{MessageConnectionConfig, MessageMetadata};

pub struct ConnectionPool {
    context: MessagingContext,
    persistent: Mutex<BTreeMap<ConnectionKey, Connection>>,
}

impl ConnectionPool {
    pub fn new(context: MessagingContext) -> Self {
        Self {
            context,
            persistent: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn context(&self) -> &MessagingContext {
        &self.context
    }

    /// Build a connection for `metadata`, establish it, and pool it unless it
    /// is a one-time backend connection.
    pub async fn establish(
        &self,
        metadata: &MessageMetadata,
        category: MessageCategory,
    ) -> Result<Connection, MessagingError> {
        let key = ConnectionKey::new(metadata.host.clone(), metadata.port, category);
        let conn = Connection::new(key.clone(), metadata, self.context.clone());
        let over_proxy = metadata.is_proxied();

        if metadata.external_certificate.is_some() {
            tracing::trace!(target = %key, "Using an external credential for this connection");
        }

        let result = conn.establish().await;

        if !metadata.conn_flags.contains(MessageConnectionConfig::ONE_TIME_FOG_CONN) {
            if let Some(previous) = self.map().insert(key.clone(), conn.clone()) {
                tracing::trace!(target = %key, replaced = %previous.id(), "Replaced pooled connection");
            }
        }

        match result {
            Ok(()) => {
                tracing::trace!(target = %key, over_proxy, "Connection established successfully");
                Ok(conn)
            }
            Err(e) => {
                let context = if over_proxy {
                    "Failed to establish connection over proxy"
                } else {
                    "Failed to establish connection"
                };
                tracing::debug!(target = %key, error = %e, "{}", context);
                Err(e)
            }
        }
    }

    /// The pooled connection for the key, evicting it if it must be closed.
    pub fn get_persistent(&self, host: &str, port: u16, category: MessageCategory) -> Option<Connection> {
        let key = ConnectionKey::new(host, port, category);
        let mut map = self.map();
        let conn = map.get(&key)?;
        if conn.should_close() {
            tracing::debug!(target = %key, "The connection needs to reestablish, evicting");
            map.remove(&key);
            return None;
        }
        Some(conn.clone())
    }

    /// The pooled backend connection for `category`.
    pub fn get_by_category(&self, category: MessageCategory) -> Result<Option<Connection>, MessagingError> {
        let agent = &self.context.agent;
        let domain = agent
            .fog_domain()
            .ok_or_else(|| MessagingError::Config("Failed to retrieve fog domain".to_string()))?;
        let port = agent
            .fog_port()
            .ok_or_else(|| MessagingError::Config("Failed to retrieve fog port".to_string()))?;
        Ok(self.get_persistent(&domain, port, category))
    }

    pub async fn send(&self, conn: &Connection, request: &HttpRequest) -> Result<HttpResponse, MessagingError> {
        conn.send_request(&request.to_wire()).await
    }

    /// Number of pooled connections.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    fn map(&self) -> MutexGuard<'_, BTreeMap<ConnectionKey, Connection>> {
        self.persistent.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
