//! Short-lived cache of backend GET responses, keyed by URI.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::http::HttpResponse;

#[derive(Debug, Clone)]
struct CachedResponse {
    response: HttpResponse,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, CachedResponse>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// The cached response for `uri`, dropping it if expired.
    pub fn get(&self, uri: &str) -> Option<HttpResponse> {
        let now = Instant::now();
        let hit = self.entries.get(uri).map(|entry| {
            if entry.expires_at > now {
                Some(entry.response.clone())
            } else {
                None
            }
        })?;
        if hit.is_none() {
            self.entries.remove_if(uri, |_, entry| entry.expires_at <= now);
        }
        hit
    }

    pub fn insert(&self, uri: &str, response: HttpResponse) {
        if self.ttl.is_zero() {
            return;
        }
        self.purge_expired();
        self.entries.insert(
            uri.to_string(),
            CachedResponse {
                response,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
