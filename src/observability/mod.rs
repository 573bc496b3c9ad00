//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! connection / pool / messaging produce:
//!     → logging.rs (structured log events, payload printouts)
//!     → metrics.rs (counters)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Metrics endpoint (Prometheus scrape)
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, printout, PrintoutType};
pub use metrics::init_metrics;
