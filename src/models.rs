//! Wire types for the gateway API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of `GET /health`.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: f64,
    pub timestamp: DateTime<Utc>,
}

/// Query parameters for `/http`.
///
/// `dst` and `port` stay raw strings here so the validator owns every
/// parsing rule and both ingress paths fail identically.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ForwardQuery {
    #[serde(default)]
    pub dst: String,
    #[serde(default)]
    pub port: String,
    pub path: Option<String>,
}

impl ForwardQuery {
    pub fn path_or_root(&self) -> &str {
        self.path.as_deref().unwrap_or("/")
    }
}

/// Query parameters for `/ws`. Same screening inputs as [`ForwardQuery`]
/// plus the optional session token.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UpgradeQuery {
    #[serde(default)]
    pub dst: String,
    #[serde(default)]
    pub port: String,
    pub path: Option<String>,
    pub token: Option<String>,
}

impl UpgradeQuery {
    pub fn path_or_root(&self) -> &str {
        self.path.as_deref().unwrap_or("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_query_defaults_missing_params() {
        let query: ForwardQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.dst, "");
        assert_eq!(query.port, "");
        assert_eq!(query.path_or_root(), "/");
    }

    #[test]
    fn upgrade_query_keeps_raw_port() {
        let query: UpgradeQuery =
            serde_json::from_str(r#"{"dst":"web","port":"80x","token":"abc"}"#).unwrap();
        assert_eq!(query.port, "80x");
        assert_eq!(query.token.as_deref(), Some("abc"));
    }

    #[test]
    fn health_response_serializes_expected_fields() {
        let health = HealthResponse {
            status: "ok".to_string(),
            uptime_secs: 12.5,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&health).unwrap();
        assert_eq!(value["status"], "ok");
        assert!(value["uptime_secs"].is_number());
        assert!(value["timestamp"].is_string());
    }
}
