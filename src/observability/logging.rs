//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Render request/response payloads for trace logs at the configured verbosity
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG` wins over the configured level when set

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::MessageConfig;

/// Install the global subscriber. Safe to call more than once; later calls are ignored.
pub fn init_logging(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("fog_messaging={default_level}").into());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// How much of a payload is written to trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintoutType {
    Full,
    Size,
    None,
    Chopped,
}

impl std::str::FromStr for PrintoutType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(PrintoutType::Full),
            "size" => Ok(PrintoutType::Size),
            "none" => Ok(PrintoutType::None),
            "chopped" => Ok(PrintoutType::Chopped),
            other => Err(format!("unknown printout type '{other}'")),
        }
    }
}

/// Render `data` according to the `[message]` printout settings.
pub fn printout(config: &MessageConfig, data: &str) -> String {
    let kind = config.data_printout_type.parse().unwrap_or_else(|_| {
        tracing::warn!(
            printout_type = %config.data_printout_type,
            "Unknown data printout option, going with 'chopped' instead"
        );
        PrintoutType::Chopped
    });
    render(kind, config.data_printout_length, data)
}

fn render(kind: PrintoutType, length: usize, data: &str) -> String {
    match kind {
        PrintoutType::Full => data.to_string(),
        PrintoutType::Size => format!("{} bytes", data.len()),
        PrintoutType::None => String::new(),
        PrintoutType::Chopped => {
            let mut end = length.min(data.len());
            while !data.is_char_boundary(end) {
                end -= 1;
            }
            let suffix = if data.len() > length { " ..." } else { "" };
            format!("{}{}", &data[..end], suffix)
        }
    }
}
