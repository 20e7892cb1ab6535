use std::net::SocketAddr;

use anyhow::{Context, Result};
use async_shutdown::Shutdown;
use log::{debug, error, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{self, Duration};

pub struct Listener {
    listen_addr: SocketAddr,
    shutdown: Shutdown,
}

impl Listener {
    /// Binds `listen_addr` and forwards every accepted socket to `sender`.
    ///
    /// Sockets arriving while `sender` is full are closed right away.
    pub async fn start(listen_addr: SocketAddr, sender: Sender<Accepted>) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await
            .with_context(|| format!("Failed to listen on {}", listen_addr))?;
        let listen_addr = listener.local_addr()
            .context("Failed to get local address")?;

        let shutdown = Shutdown::new();
        let this = Self {
            listen_addr,
            shutdown: shutdown.clone(),
        };

        let listener_loop = async move {
            loop {
                let (stream, remote_addr) = match listener.accept().await.context("Tcp accept failed") {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        error!("{:#}", err);
                        time::sleep(Duration::from_secs(1)).await;
                        continue;
                    },
                };

                debug!("Accepted {} on {}", remote_addr, listen_addr);

                let accepted = Accepted {
                    listen_addr,
                    remote_addr,
                    stream,
                };

                match sender.try_send(accepted) {
                    Ok(()) => {},
                    Err(TrySendError::Full(accepted)) => {
                        warn!("Too many pending connections, dropping {}", accepted.remote_addr);
                    },
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        };
        let listener_loop = shutdown.wrap_cancel(listener_loop);
        let listener_loop = shutdown.wrap_wait(listener_loop)?;

        tokio::spawn(listener_loop);

        Ok(this)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub async fn shutdown(&self) {
        self.shutdown.shutdown();
        self.shutdown.wait_shutdown_complete().await;
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown.shutdown();
    }
}

pub struct Accepted {
    pub listen_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub stream: TcpStream,
}
