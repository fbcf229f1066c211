//! idresolve HTTP Server
//!
//! A standalone server binary exposing `POST /identify`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;

use idresolve::telemetry::{init_tracing, LogFormat};
use idresolve::transport;
use idresolve::{
    ContactRepository, EngineConfig, FlattenPolicy, IdentityEngine, InMemoryContactStore,
    SqliteContactStore,
};

/// Server configuration
#[derive(Debug, Parser)]
#[command(name = "idresolve-server", version, about = "Contact identity resolution over HTTP")]
struct ServerConfig {
    /// Address to bind to
    #[arg(long, env = "IDRESOLVE_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Port override for the bind address
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// SQLite database file; an in-memory store is used when omitted
    #[arg(short, long, env = "IDRESOLVE_DATABASE")]
    database: Option<PathBuf>,

    /// How links are flattened after a merge: rewrite | read-time
    #[arg(long, env = "IDRESOLVE_FLATTEN_POLICY", default_value = "rewrite")]
    flatten_policy: FlattenPolicy,

    /// Identity-key lock stripes
    #[arg(long, env = "IDRESOLVE_LOCK_STRIPES", default_value_t = idresolve::config::DEFAULT_LOCK_STRIPES)]
    lock_stripes: usize,

    /// Log line format: text | json
    #[arg(long, env = "IDRESOLVE_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

impl ServerConfig {
    fn addr(&self) -> SocketAddr {
        let mut addr = self.bind;
        if let Some(port) = self.port {
            addr.set_port(port);
        }
        addr
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            flatten_policy: self.flatten_policy,
            lock_stripes: self.lock_stripes,
        }
    }
}

fn open_repository(config: &ServerConfig) -> Result<Arc<dyn ContactRepository>, Box<dyn std::error::Error>> {
    match &config.database {
        Some(path) => {
            tracing::info!(path = %path.display(), "opening sqlite contact store");
            Ok(Arc::new(SqliteContactStore::open(path)?))
        }
        None => {
            tracing::warn!("no database configured; contacts are kept in memory only");
            Ok(Arc::new(InMemoryContactStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::parse();
    init_tracing(config.log_format);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "idresolve server starting");

    // The repository lives as long as the server; the engine only borrows it.
    let contacts = open_repository(&config)?;
    let engine = IdentityEngine::with_config(contacts, config.engine_config());

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, flatten_policy = %config.flatten_policy, "listening");

    transport::serve(listener, engine, async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install ctrl-c handler; serving until killed");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    tracing::info!("shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_overrides_bind() {
        let cfg = ServerConfig::parse_from(["idresolve-server", "--bind", "0.0.0.0:8080", "--port", "9000"]);
        assert_eq!(cfg.addr(), "0.0.0.0:9000".parse().unwrap());
    }

    #[test]
    fn flatten_policy_is_parsed() {
        let cfg = ServerConfig::parse_from(["idresolve-server", "--flatten-policy", "read-time"]);
        assert_eq!(cfg.engine_config().flatten_policy, FlattenPolicy::ReadTime);
    }
}
