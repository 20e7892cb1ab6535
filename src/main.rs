use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::signal;
use tokio::sync::mpsc;

use self::config::Config;
use self::detect_session::DetectSession;
use self::http_session::HttpSessions;
use self::listener::Listener;

mod config;
mod detect_session;
mod http_session;
mod listener;
mod proto;
mod rewind;
mod tls;

const MAX_UNACCEPTED_SOCKETS: usize = 100;

#[tokio::main]
pub async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = env::args_os().nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = Config::read(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let tls = tls::load_acceptor(&config.tls)
        .context("failed to set up tls")?;

    if !config.doc_root.is_dir() {
        warn!("Document root {} is not a directory", config.doc_root.display());
    }

    let doc_root: Arc<Path> = Arc::from(config.doc_root.as_path());
    let sessions = Arc::new(HttpSessions::new(config.detect.timeout));

    let (socket_tx, mut socket_rx) = mpsc::channel(MAX_UNACCEPTED_SOCKETS);
    let listener = Listener::start(config.listen_addr, socket_tx).await?;

    info!("Listening on {} (tls and plain)", listener.listen_addr());

    loop {
        let accepted = tokio::select! {
            accepted = socket_rx.recv() => accepted.context("BUG: listener socket_tx dropped")?,
            _ = signal::ctrl_c() => break,
        };

        debug!("Detecting protocol of {} on {}", accepted.remote_addr, accepted.listen_addr);

        DetectSession::new(accepted.stream, &tls, Arc::clone(&doc_root), Arc::clone(&sessions))
            .with_timeout(config.detect.timeout)
            .with_remote_addr(accepted.remote_addr)
            .run();
    }

    info!("Shutting down");
    listener.shutdown().await;

    Ok(())
}
