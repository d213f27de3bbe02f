//! Listener lifecycle
//!
//! A [`ServerHandle`] owns one listening socket and moves through
//! [`ServerState`]: `start` binds and serves until stopped, `graceful_stop`
//! drains in-flight calls, `stop` aborts them.

use super::state::ServerState;
use super::{BoxError, HttpService, ResponseBody, StoppableServer};
use crate::error::RuntimeError;
use crate::hooks::ServerOptions;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopRequest {
    None,
    Graceful,
    Forced,
}

/// One bound (or not yet bound) listener.
pub struct ServerHandle {
    name: String,
    address: String,
    options: ServerOptions,
    service: Mutex<Option<HttpService>>,
    state: watch::Sender<ServerState>,
    stop: watch::Sender<StopRequest>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Moves the server to a terminal state when serving ends, including when
/// the serving future is dropped.
struct ExitGuard<'a> {
    state: &'a watch::Sender<ServerState>,
    exit: ServerState,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let exit = self.exit;
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = exit;
            true
        });
    }
}

impl ServerHandle {
    /// Handle serving `service` on `address` once started
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        options: ServerOptions,
        service: HttpService,
    ) -> Self {
        let (state, _) = watch::channel(ServerState::Created);
        let (stop, _) = watch::channel(StopRequest::None);
        Self {
            name: name.into(),
            address: address.into(),
            options,
            service: Mutex::new(Some(service)),
            state,
            stop,
            local_addr: Mutex::new(None),
        }
    }

    /// Configured address
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Bound address, once listening
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Wait until the server has left `Created`, returning the bound address
    /// if it got as far as listening
    pub async fn wait_listening(&self) -> Option<SocketAddr> {
        let mut state = self.state.subscribe();
        // The sender lives in `self`, so this only returns once the state changes.
        let _ = state.wait_for(|s| *s != ServerState::Created).await;
        self.local_addr()
    }

    fn invalid_state(&self, operation: &'static str) -> RuntimeError {
        RuntimeError::InvalidState {
            name: self.name.clone(),
            operation,
            state: *self.state.borrow(),
        }
    }

    /// Move a server that never started straight to `terminal`.
    /// Returns whether the server is now terminal.
    fn finish_unstarted(&self, terminal: ServerState) -> bool {
        let mut already_terminal = false;
        let moved = self.state.send_if_modified(|state| match *state {
            ServerState::Created => {
                *state = terminal;
                true
            }
            other => {
                already_terminal = other.is_terminal();
                false
            }
        });
        if moved {
            self.service.lock().take();
            info!(server = %self.name, state = %terminal, "Server stopped before it started");
        }
        moved || already_terminal
    }

    async fn wait_terminal(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }

    async fn serve(&self, listener: TcpListener, service: HttpService) -> ServerState {
        let mut stop = self.stop.subscribe();
        let (drain_tx, drain_rx) = watch::channel(false);
        let acceptor = self.options.tls.clone().map(TlsAcceptor::from);
        let mut connections = JoinSet::new();

        let request = loop {
            tokio::select! {
                requested = wait_for_copy(&mut stop, |r| r != StopRequest::None) => {
                    break requested.unwrap_or(StopRequest::Forced);
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(server = %self.name, peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            acceptor.clone(),
                            service.clone(),
                            self.options.clone(),
                            drain_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!(server = %self.name, error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };
        drop(listener);

        if request == StopRequest::Graceful {
            info!(server = %self.name, connections = connections.len(), "Draining connections");
            drain_tx.send_replace(true);
            loop {
                tokio::select! {
                    joined = connections.join_next() => {
                        if joined.is_none() {
                            return ServerState::GracefullyStopped;
                        }
                    }
                    Some(_) = wait_for_copy(&mut stop, |r| r == StopRequest::Forced) => break,
                }
            }
        }

        info!(server = %self.name, connections = connections.len(), "Aborting connections");
        connections.shutdown().await;
        ServerState::Stopped
    }
}

#[async_trait]
impl StoppableServer for ServerHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        if self.state() != ServerState::Created {
            return Err(self.invalid_state("start"));
        }
        let Some(service) = self.service.lock().take() else {
            return Err(self.invalid_state("start"));
        };

        let listener = match TcpListener::bind(&self.address).await {
            Ok(listener) => listener,
            Err(source) => {
                *self.service.lock() = Some(service);
                error!(server = %self.name, address = %self.address, error = %source, "Failed to bind listener");
                return Err(RuntimeError::ListenerBindFailure {
                    address: self.address.clone(),
                    source,
                });
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(source) => {
                *self.service.lock() = Some(service);
                return Err(RuntimeError::ListenerBindFailure {
                    address: self.address.clone(),
                    source,
                });
            }
        };
        *self.local_addr.lock() = Some(local_addr);

        let listening = self.state.send_if_modified(|state| {
            if *state == ServerState::Created {
                *state = ServerState::Listening;
                true
            } else {
                false
            }
        });
        if !listening {
            // Stopped while binding.
            return Ok(());
        }

        info!(
            server = %self.name,
            address = %local_addr,
            tls = self.options.tls.is_some(),
            "Server listening"
        );

        let mut guard = ExitGuard {
            state: &self.state,
            exit: ServerState::Stopped,
        };
        guard.exit = self.serve(listener, service).await;
        info!(server = %self.name, state = %guard.exit, "Server stopped");
        Ok(())
    }

    async fn graceful_stop(&self) {
        if self.finish_unstarted(ServerState::GracefullyStopped) {
            return;
        }
        self.stop.send_if_modified(|request| {
            if *request == StopRequest::None {
                *request = StopRequest::Graceful;
                true
            } else {
                false
            }
        });
        self.wait_terminal().await;
    }

    async fn stop(&self) {
        if self.finish_unstarted(ServerState::Stopped) {
            return;
        }
        self.stop.send_if_modified(|request| {
            if *request == StopRequest::Forced {
                false
            } else {
                *request = StopRequest::Forced;
                true
            }
        });
        self.wait_terminal().await;
    }
}

/// Wait until the watched value satisfies `accept`, returning a copy of it.
/// `None` once the sender is gone.
async fn wait_for_copy<T: Copy>(
    rx: &mut watch::Receiver<T>,
    accept: impl Fn(T) -> bool,
) -> Option<T> {
    rx.wait_for(|value| accept(*value)).await.ok().map(|value| *value)
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    service: HttpService,
    options: ServerOptions,
    drain: watch::Receiver<bool>,
) {
    match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls) => drive(tls, peer, service, &options, drain).await,
            Err(e) => debug!(peer = %peer, error = %e, "TLS handshake failed"),
        },
        None => drive(stream, peer, service, &options, drain).await,
    }
}

async fn drive<I>(
    io: I,
    peer: SocketAddr,
    service: HttpService,
    options: &ServerOptions,
    mut drain: watch::Receiver<bool>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut builder = Builder::new(TokioExecutor::new());
    {
        let mut http2 = builder.http2();
        http2.timer(TokioTimer::new());
        if let Some(streams) = options.max_concurrent_streams {
            http2.max_concurrent_streams(streams);
        }
        if let Some(interval) = options.http2_keepalive_interval {
            http2.keep_alive_interval(interval);
        }
        if let Some(timeout) = options.http2_keepalive_timeout {
            http2.keep_alive_timeout(timeout);
        }
        if let Some(size) = options.max_frame_size {
            http2.max_frame_size(size);
        }
    }

    let service = service_fn(move |request: Request<Incoming>| {
        let service = service.clone();
        async move {
            let response = service
                .oneshot(request)
                .await
                .unwrap_or_else(|e| transport_failure(peer, &e));
            Ok::<_, Infallible>(response)
        }
    });
    let connection = builder.serve_connection(TokioIo::new(io), service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = wait_for_copy(&mut drain, |draining| draining) => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };
    if let Err(e) = result {
        debug!(peer = %peer, error = %e, "Connection closed with error");
    }
}

/// Response for a call the service stack failed without rendering an error
fn transport_failure(peer: SocketAddr, error: &BoxError) -> Response<ResponseBody> {
    error!(peer = %peer, error = %error, "Service failed to produce a response");
    let body = Empty::<Bytes>::new()
        .map_err(|never| -> BoxError { match never {} })
        .boxed_unsync();
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
