//! Destination screening.
//!
//! Every proxied connection, HTTP or WebSocket, passes through
//! [`validate_destination`] before the gateway dials anything. The rules are
//! pure string checks over the immutable [`GatewayConfig`], evaluated in a
//! fixed order so both ingress paths report the same first failure.

use crate::config::GatewayConfig;

/// A destination that passed screening. Host is kept verbatim, port is the
/// parsed numeric value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Screens a raw `dst`/`port` pair against the configured rules.
///
/// Rules, in order:
/// 1. `dst` must be non-empty.
/// 2. `dst` must look like a bare service hostname (ASCII alphanumerics and
///    internal hyphens, no dots) or start with the VPC prefix.
/// 3. `port` must parse as a port number.
/// 4. the parsed port must be in the allowlist.
///
/// The error string names the first failing rule and is meant for server
/// logs, not for clients.
pub fn validate_destination(
    config: &GatewayConfig,
    dst: &str,
    port: &str,
) -> Result<Target, String> {
    if dst.is_empty() {
        return Err("destination host is empty".to_string());
    }
    if !hostname_like(dst) && !dst.starts_with(config.vpc_prefix.as_str()) {
        return Err(format!(
            "destination '{dst}' is neither a service hostname nor inside the '{}' prefix",
            config.vpc_prefix
        ));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| format!("port '{port}' is not a valid port number"))?;
    if !config.port_allowed(port) {
        return Err(format!("port {port} is not in the allowed set"));
    }
    Ok(Target {
        host: dst.to_string(),
        port,
    })
}

/// Bare service-name grammar: ASCII alphanumerics with hyphens allowed only
/// between them. Dotted names fail here on purpose; anything dotted must
/// qualify through the VPC prefix instead.
fn hostname_like(s: &str) -> bool {
    let bytes = s.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
        }
        _ => false,
    }
}
