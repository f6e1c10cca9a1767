use serde::{Deserialize, Serialize};

/// Executor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Call the broadcaster before and after the unit of work
    pub listeners: bool,

    /// Maximum number of statements in flight within one phase set
    /// (`None` = unbounded)
    pub max_in_flight: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            listeners: true,
            max_in_flight: None,
        }
    }
}

impl ExecutorConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable broadcasting
    pub fn listeners(mut self, enabled: bool) -> Self {
        self.listeners = enabled;
        self
    }

    /// Bound concurrent statements per phase set
    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit.max(1));
        self
    }

    /// Remove the concurrency bound
    pub fn unbounded(mut self) -> Self {
        self.max_in_flight = None;
        self
    }
}
