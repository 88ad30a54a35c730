pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod forward;
pub mod models;
pub mod validate;
pub mod vnc_bridge;
pub mod ws_proxy;

pub use api::{build_router, screen_upgrade, AppState, UpgradeRoute};
pub use config::GatewayConfig;
pub use errors::{GatewayError, GatewayResult};
pub use validate::{validate_destination, Target};

pub const DEFAULT_HTTP_PORT: u16 = 8080;
