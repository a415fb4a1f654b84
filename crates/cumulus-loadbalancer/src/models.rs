//! Load balancer models.

use serde::{Deserialize, Serialize};

/// Per-address connection limits applied by a load balancer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionThrottle {
    /// Maximum connections allowed from a single IP address.
    pub max_connections: u32,
    /// Maximum connections from a single IP address within `rate_interval`.
    pub max_connection_rate: u32,
    /// Connections allowed from a single IP address before throttling applies.
    pub min_connections: u32,
    /// Window in seconds over which `max_connection_rate` is assessed.
    pub rate_interval: u32,
}
