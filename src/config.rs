//! Gateway configuration.
//!
//! Built once at startup from flags/environment and shared read-only for the
//! lifetime of the process. Changing the allowlist or the shared secret
//! requires a restart.

use std::collections::BTreeSet;

/// Ports a session is allowed to reach when no override is configured.
pub const DEFAULT_ALLOWED_PORTS: [u16; 9] = [22, 80, 443, 5900, 5901, 6901, 8080, 3000, 3389];

/// Destinations starting with this prefix count as in-VPC addresses.
pub const DEFAULT_VPC_PREFIX: &str = "10.";

/// Ports that select the VNC bridge instead of the generic WebSocket proxy.
pub const VNC_PORTS: [u16; 3] = [5900, 5901, 6901];

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Secret expected in `X-RANGEX-PROXY-KEY`. `None` rejects every plain
    /// HTTP proxy request; WebSocket upgrades can still pass with a session
    /// token.
    pub shared_secret: Option<String>,
    /// String prefix that marks a destination as an in-VPC address.
    pub vpc_prefix: String,
    /// Destination ports the gateway may dial.
    pub allowed_ports: BTreeSet<u16>,
    /// Concurrent VNC bridge cap, 0 means unlimited.
    pub max_bridges: usize,
    /// In-flight proxied HTTP request cap, 0 means unlimited.
    pub max_forwards: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            shared_secret: None,
            vpc_prefix: DEFAULT_VPC_PREFIX.to_string(),
            allowed_ports: DEFAULT_ALLOWED_PORTS.into_iter().collect(),
            max_bridges: 0,
            max_forwards: 0,
        }
    }
}

impl GatewayConfig {
    pub fn new(
        shared_secret: Option<String>,
        vpc_prefix: String,
        allowed_ports: BTreeSet<u16>,
        max_bridges: usize,
        max_forwards: usize,
    ) -> Self {
        Self {
            // An empty secret behaves the same as an unset one.
            shared_secret: shared_secret.filter(|s| !s.is_empty()),
            vpc_prefix,
            allowed_ports,
            max_bridges,
            max_forwards,
        }
    }

    pub fn port_allowed(&self, port: u16) -> bool {
        self.allowed_ports.contains(&port)
    }
}

/// Returns true if `port` belongs to the VNC family and upgrades to it should
/// be bridged to raw TCP rather than proxied frame-for-frame.
pub fn is_vnc_port(port: u16) -> bool {
    VNC_PORTS.contains(&port)
}

/// Parses a comma-separated port list. Entries that do not parse as a port
/// are skipped with a warning; an empty result falls back to the default
/// allowlist so a typo cannot brick the gateway.
pub fn parse_port_list(raw: &str) -> BTreeSet<u16> {
    let mut ports = BTreeSet::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.parse::<u16>() {
            Ok(port) => {
                ports.insert(port);
            }
            Err(_) => {
                tracing::warn!("ignoring invalid port entry '{entry}' in allowed port list");
            }
        }
    }
    if ports.is_empty() {
        tracing::warn!("allowed port list '{raw}' is empty or invalid, using defaults");
        ports = DEFAULT_ALLOWED_PORTS.into_iter().collect();
    }
    ports
}
