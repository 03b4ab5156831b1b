//! Audio relay server binary
//!
//! Configuration comes from the environment (and `.env` if present).
//! Set `LOG_FORMAT=json` for structured log lines and `RUST_LOG` to tune
//! verbosity.

use std::sync::Arc;

use audio_relay::auth::JwtAuthenticator;
use audio_relay::server::config::DEFAULT_JWT_SECRET;
use audio_relay::sink::FileSink;
use audio_relay::{RelayServer, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing();

    if config.jwt_secret == DEFAULT_JWT_SECRET {
        tracing::warn!("JWT_SECRET not set, using the development default");
    }

    let sink = FileSink::new(&config.storage_dir, &config.capture_extension);
    tokio::fs::create_dir_all(sink.dir()).await?;
    let authenticator = Arc::new(JwtAuthenticator::hs256(config.jwt_secret.as_bytes()));

    tracing::info!(
        addr = %config.bind_addr,
        storage_dir = %sink.dir().display(),
        max_connections = config.max_connections,
        "Starting audio relay"
    );

    let server = RelayServer::new(config, sink, authenticator);
    if let Err(e) = server.run_until(shutdown_signal()).await {
        tracing::error!(error = %e, "Server error");
        return Err(e.into());
    }

    let stats = server.stats();
    tracing::info!(
        connections = stats.total_connections,
        rejected = stats.rejected_upgrades,
        sessions = stats.sessions,
        evictions = stats.evictions,
        bytes_received = stats.total_bytes_received,
        bytes_sent = stats.total_bytes_sent,
        "Shut down"
    );

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("audio_relay=info,tower_http=info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
