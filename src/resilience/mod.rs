//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request on a connection:
//!     → timeouts.rs (connect / handshake / send / receive deadlines)
//!     → On failure: one re-establish and retry inside the connection
//!     → suspension.rs (count failures, suspend the connection past the threshold)
//!     → is_suspended() probes the backend once the suspension expires
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every network step has a deadline
//! - Exactly one retry per request; sustained failure becomes a suspension
//! - Suspensions are per connection, not global

pub mod suspension;
pub mod timeouts;

pub use suspension::{Suspension, SuspensionReason, SuspensionStatus};
pub use timeouts::ReceiveDeadlines;
