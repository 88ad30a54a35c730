use clap::Parser;
use rangex_gateway::config::{parse_port_list, GatewayConfig};
use rangex_gateway::{build_router, AppState, DEFAULT_HTTP_PORT};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tokio::time::{sleep, Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "rangex-gatewayd", author, version)]
struct Options {
    /// Address the gateway binds to
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,
    /// Port for the gateway listener
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "RANGEX_GATEWAY_PORT")]
    port: u16,
    /// Shared secret expected in X-RANGEX-PROXY-KEY; leaving it unset
    /// disables plain HTTP proxying
    #[arg(long, env = "RANGEX_PROXY_KEY")]
    proxy_key: Option<String>,
    /// Prefix that marks a destination as an in-VPC address
    #[arg(long, default_value = "10.", env = "RANGEX_VPC_PREFIX")]
    vpc_prefix: String,
    /// Comma-separated ports the gateway may dial
    #[arg(
        long,
        default_value = "22,80,443,5900,5901,6901,8080,3000,3389",
        env = "RANGEX_ALLOWED_PORTS"
    )]
    allowed_ports: String,
    /// Concurrent VNC bridge cap, 0 means unlimited
    #[arg(long, default_value_t = 0, env = "RANGEX_MAX_BRIDGES")]
    max_bridges: usize,
    /// In-flight proxied HTTP request cap, 0 means unlimited
    #[arg(long, default_value_t = 0, env = "RANGEX_MAX_FORWARDS")]
    max_forwards: usize,
    /// Directory used for logs; stdout only when unset
    #[arg(long, env = "RANGEX_GATEWAY_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    let _guard = init_tracing(options.log_dir.as_deref());

    run_server(options).await;

    Ok(())
}

fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .init();
        return None;
    };

    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!(
            "Failed to create log directory {:?}: {}. Logging to file disabled.",
            log_dir, e
        );
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .init();
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, "rangex-gatewayd.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Some(guard)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for SIGINT: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!("failed to install SIGTERM handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

async fn run_server(options: Options) {
    let bind_ip = parse_bind_ip(&options.bind);

    let config = GatewayConfig::new(
        options.proxy_key,
        options.vpc_prefix,
        parse_port_list(&options.allowed_ports),
        options.max_bridges,
        options.max_forwards,
    );
    if config.shared_secret.is_none() {
        tracing::warn!(
            "no proxy key configured; plain HTTP proxying is disabled, only tokened upgrades pass"
        );
    }
    tracing::info!(
        vpc_prefix = %config.vpc_prefix,
        allowed_ports = ?config.allowed_ports,
        "destination screening configured"
    );

    let app = build_router(AppState::new(config));

    let addr = SocketAddr::new(bind_ip, options.port);
    let retry_delay = Duration::from_secs(5);

    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!("rangex-gatewayd listening on http://{}", addr);

                match axum::serve(
                    listener,
                    app.clone().into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(shutdown_signal())
                .await
                {
                    Ok(()) => {
                        tracing::info!("server shut down gracefully");
                        break;
                    }
                    Err(error) => {
                        tracing::error!(?error, "server error; restarting");
                    }
                }
            }
            Err(error) => {
                tracing::error!(?error, %addr, "failed to bind listener");
            }
        }

        tracing::info!(
            "retrying server startup in {} seconds",
            retry_delay.as_secs()
        );
        sleep(retry_delay).await;
    }
}

fn parse_bind_ip(bind: &str) -> IpAddr {
    bind.parse().unwrap_or_else(|error| {
        tracing::error!(?error, %bind, "invalid bind address, falling back to 0.0.0.0");
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    })
}
