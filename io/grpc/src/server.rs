//! Server front-end: registers services and runs one connection thread per
//! accepted socket.

use crate::config::ServerConfig;
use crate::connection::server::ServerEndpoint;
use crate::connection::{ConnectionManager, Core};
use crate::error::Error;
use crate::registry::MethodRegistry;
use crate::service::Service;
use http2::Role;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Builds a [`Server`] from its services.
pub struct ServerBuilder {
    config: ServerConfig,
    registry: MethodRegistry,
}

impl ServerBuilder {
    pub fn add_service(mut self, service: Service) -> Self {
        info!(service = service.name(), "adding service");
        self.registry.add_service(service);
        self
    }

    pub fn build(self) -> Server {
        Server {
            registry: Arc::new(self.registry),
            config: Arc::new(self.config),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Requests a graceful stop of a [`Server`].
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Stop accepting and drain every connection with GOAWAY.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// A gRPC server.
///
/// The method registry is fixed once built and shared read-only by every
/// connection.
#[derive(Clone)]
pub struct Server {
    registry: Arc<MethodRegistry>,
    config: Arc<ServerConfig>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder {
            config,
            registry: MethodRegistry::new(),
        }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: self.shutdown.clone(),
        }
    }

    /// Accept connections until shut down, then wait for every connection
    /// to drain.
    pub fn serve(&self, listener: TcpListener) -> Result<(), Error> {
        listener.set_nonblocking(true)?;
        info!(
            addr = %listener.local_addr()?,
            methods = self.registry.len(),
            "serving"
        );

        let mut connections: Vec<JoinHandle<()>> = Vec::new();
        while !self.shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    let server = self.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("grpc-conn-{}", peer))
                        .spawn(move || {
                            if let Err(e) = server.serve_connection(stream) {
                                debug!(%peer, error = %e, "connection ended with an error");
                            }
                        });
                    match spawned {
                        Ok(handle) => connections.push(handle),
                        Err(e) => warn!(%peer, error = %e, "failed to spawn connection thread"),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(self.config.poll_interval());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return Err(e.into());
                }
            }
            connections.retain(|handle| !handle.is_finished());
        }

        info!(connections = connections.len(), "shutting down");
        for handle in connections {
            let _ = handle.join();
        }
        Ok(())
    }

    /// Run one connection on the calling thread until it closes.
    pub fn serve_connection(&self, stream: TcpStream) -> Result<(), Error> {
        stream.set_nonblocking(false)?;
        let peer = stream.peer_addr().ok();
        let label = peer.map_or_else(|| "unknown".to_string(), |p| p.to_string());

        let core = Core::new(
            Role::Server,
            self.config.http2.settings(),
            self.config.defer_response_headers,
            label,
        );
        let endpoint = ServerEndpoint::new(
            self.registry.clone(),
            self.config.clone(),
            self.shutdown.clone(),
            peer,
        );
        ConnectionManager::new(core, endpoint).run(stream, self.config.poll_interval())
    }
}
