//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound connect, handshake, send and receive steps by their own deadline
//! - Report which domain expired
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{MessagingError, TimeoutKind};

/// Run `fut` for at most `limit`.
pub async fn within<F, T>(kind: TimeoutKind, limit: Duration, fut: F) -> Result<T, MessagingError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| MessagingError::Timeout(kind))
}

/// Run `fut` until `deadline` at the latest.
pub async fn until<F, T>(kind: TimeoutKind, deadline: Instant, fut: F) -> Result<T, MessagingError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| MessagingError::Timeout(kind))
}

/// The two receive clocks: time since the last bytes arrived, and total time.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveDeadlines {
    stall: Duration,
    stall_deadline: Instant,
    global_deadline: Instant,
}

impl ReceiveDeadlines {
    pub fn start(stall: Duration, global: Duration) -> Self {
        let now = Instant::now();
        Self {
            stall,
            stall_deadline: now + stall,
            global_deadline: now + global,
        }
    }

    /// Bytes arrived; restart the stall clock.
    pub fn progress(&mut self) {
        self.stall_deadline = Instant::now() + self.stall;
    }

    /// The earliest of the two deadlines.
    pub fn next(&self) -> Instant {
        self.stall_deadline.min(self.global_deadline)
    }

    /// Which clock expired at `next()`.
    pub fn expired_kind(&self) -> TimeoutKind {
        if self.global_deadline <= self.stall_deadline {
            TimeoutKind::ReceiveGlobal
        } else {
            TimeoutKind::ReceiveStall
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn within_reports_kind() {
        let err = within(TimeoutKind::Handshake, Duration::from_millis(10), std::future::pending::<()>())
            .await
            .unwrap_err();
        assert!(err.is_timeout(TimeoutKind::Handshake));

        let ok = within(TimeoutKind::Send, Duration::from_secs(1), async { 7 }).await.unwrap();
        assert_eq!(ok, 7);
    }

    #[test]
    fn receive_deadline_kinds() {
        let stall_first = ReceiveDeadlines::start(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(stall_first.expired_kind(), TimeoutKind::ReceiveStall);

        let global_first = ReceiveDeadlines::start(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(global_first.expired_kind(), TimeoutKind::ReceiveGlobal);
        assert_eq!(global_first.next(), global_first.global_deadline);
    }
}
