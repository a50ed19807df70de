//! Client configuration.

use rtdb_engine::rpc::DEFAULT_CALL_TIMEOUT;
use rtdb_engine::RpcConfig;
use std::time::Duration;

/// Delay between a lost connection and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Wait before reconnecting after an error or close
    pub reconnect_delay: Duration,
    /// Call timeout; `None` waits for responses forever
    pub call_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
        }
    }
}

impl ClientConfig {
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn rpc_config(&self) -> RpcConfig {
        RpcConfig {
            call_timeout: self.call_timeout,
        }
    }
}
