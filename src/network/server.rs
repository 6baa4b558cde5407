//! TCP Server
//!
//! Accepts connections and serves each on its own thread.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::archive::Archive;
use crate::config::Config;
use crate::error::Result;
use crate::protocol::{write_response, Response};

use super::{Connection, NetworkStream};

/// How often the accept loop checks for shutdown while idle
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Remote query server over a shared archive
pub struct Server {
    config: Config,
    archive: Archive,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

/// Stops a running server from another thread
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

/// Decrements the live connection count when a worker exits
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Server {
    /// Bind `config.listen_addr`
    pub fn bind(config: Config, archive: Archive) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            config,
            archive,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
        }
    }

    /// Signal the accept loop to stop
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Accept connections until shutdown is signalled (blocking)
    pub fn run(&self) -> Result<()> {
        tracing::info!(
            addr = %self.local_addr()?,
            max_connections = self.config.max_connections,
            "server listening"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((socket, peer)) => self.dispatch(socket, peer),
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        tracing::info!("server stopped accepting connections");
        Ok(())
    }

    fn dispatch(&self, socket: TcpStream, peer: SocketAddr) {
        if let Err(e) = socket.set_nonblocking(false) {
            tracing::warn!(%peer, error = %e, "could not configure socket");
            return;
        }

        if self.active.fetch_add(1, Ordering::SeqCst) >= self.config.max_connections {
            self.active.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!(%peer, "connection limit reached, rejecting");
            reject(socket, self.config.io_timeout_ms);
            return;
        }
        let guard = ActiveGuard(Arc::clone(&self.active));

        let archive = self.archive.clone();
        let timeout_ms = self.config.io_timeout_ms;
        let spawned = thread::Builder::new()
            .name(format!("tsarchive-conn-{}", peer))
            .spawn(move || {
                let _guard = guard;
                match Connection::new(socket, archive, timeout_ms) {
                    Ok(mut connection) => {
                        if let Err(e) = connection.handle() {
                            tracing::debug!(%peer, error = %e, "connection ended with error");
                        }
                    }
                    Err(e) => tracing::warn!(%peer, error = %e, "could not set up connection"),
                }
            });

        if let Err(e) = spawned {
            tracing::warn!(%peer, error = %e, "could not spawn connection thread");
        }
    }
}

fn reject(socket: TcpStream, timeout_ms: u64) {
    if let Ok(mut stream) = NetworkStream::from_tcp(socket, timeout_ms) {
        write_response(&mut *stream, &Response::Error("server busy".to_string()));
        stream.disconnect();
    }
}
