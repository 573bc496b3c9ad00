//! Shared dependencies handed to every connection.

use std::sync::Arc;

use crate::agent::{AgentDetails, StaticAgentDetails};
use crate::config::MessagingConfig;

/// Validated configuration plus the agent identity provider.
#[derive(Clone)]
pub struct MessagingContext {
    pub config: Arc<MessagingConfig>,
    pub agent: Arc<dyn AgentDetails>,
}

impl MessagingContext {
    pub fn new(config: MessagingConfig, agent: Arc<dyn AgentDetails>) -> Self {
        Self {
            config: Arc::new(config),
            agent,
        }
    }

    /// Context whose agent identity comes from the `[agent]` config section.
    pub fn from_config(config: MessagingConfig) -> Self {
        let agent = Arc::new(StaticAgentDetails::from_config(&config.agent));
        Self::new(config, agent)
    }
}

impl std::fmt::Debug for MessagingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingContext")
            .field("config", &self.config)
            .field("service_name", &self.agent.service_name())
            .finish()
    }
}
