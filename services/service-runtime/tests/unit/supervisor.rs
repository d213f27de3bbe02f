//! Supervisor coordination, driven with in-memory servers

use async_trait::async_trait;
use parking_lot::Mutex;
use service_runtime::error::RuntimeError;
use service_runtime::{ServerState, StoppableServer, Supervisor};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    Healthy,
    FailsToBind,
    IgnoresGracefulStop,
}

struct FakeServer {
    name: &'static str,
    behaviour: Behaviour,
    state: Mutex<ServerState>,
    exit: Notify,
    graceful_stops: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeServer {
    fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name,
            behaviour,
            state: Mutex::new(ServerState::Created),
            exit: Notify::new(),
            graceful_stops: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }

    fn graceful_stops(&self) -> usize {
        self.graceful_stops.load(Ordering::SeqCst)
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoppableServer for FakeServer {
    fn name(&self) -> &str {
        self.name
    }

    fn state(&self) -> ServerState {
        *self.state.lock()
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        if self.behaviour == Behaviour::FailsToBind {
            return Err(RuntimeError::ListenerBindFailure {
                address: "127.0.0.1:1".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
            });
        }
        *self.state.lock() = ServerState::Listening;
        self.exit.notified().await;
        Ok(())
    }

    async fn graceful_stop(&self) {
        self.graceful_stops.fetch_add(1, Ordering::SeqCst);
        if self.behaviour == Behaviour::IgnoresGracefulStop {
            std::future::pending::<()>().await;
        }
        *self.state.lock() = ServerState::GracefullyStopped;
        self.exit.notify_one();
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ServerState::Stopped;
        self.exit.notify_one();
    }
}

fn supervise(servers: &[Arc<FakeServer>], timeout: Duration) -> Supervisor {
    servers.iter().fold(Supervisor::new(timeout), |supervisor, server| {
        supervisor.with_server(Arc::clone(server) as Arc<dyn StoppableServer>)
    })
}

#[tokio::test]
async fn signal_stops_every_server_gracefully() {
    let servers = [
        FakeServer::new("grpc", Behaviour::Healthy),
        FakeServer::new("admin", Behaviour::Healthy),
    ];
    let supervisor = supervise(&servers, Duration::from_secs(5));
    assert_eq!(supervisor.servers().len(), 2);

    supervisor
        .run(tokio::time::sleep(Duration::from_millis(50)))
        .await
        .unwrap();

    for server in &servers {
        assert_eq!(server.graceful_stops(), 1);
        assert_eq!(server.stops(), 0);
        assert_eq!(server.state(), ServerState::GracefullyStopped);
    }
}

#[tokio::test]
async fn failing_server_brings_the_others_down() {
    let servers = [
        FakeServer::new("grpc", Behaviour::Healthy),
        FakeServer::new("admin", Behaviour::FailsToBind),
    ];

    let err = supervise(&servers, Duration::from_secs(5))
        .run(std::future::pending())
        .await
        .unwrap_err();

    assert!(matches!(err, RuntimeError::ListenerBindFailure { .. }));
    assert_eq!(servers[0].graceful_stops(), 1);
    assert_eq!(servers[0].state(), ServerState::GracefullyStopped);
}

#[tokio::test]
async fn drain_timeout_escalates_to_stop() {
    let servers = [
        FakeServer::new("grpc", Behaviour::IgnoresGracefulStop),
        FakeServer::new("admin", Behaviour::Healthy),
    ];

    tokio::time::timeout(
        Duration::from_secs(5),
        supervise(&servers, Duration::from_millis(100))
            .run(tokio::time::sleep(Duration::from_millis(20))),
    )
    .await
    .expect("supervisor did not finish")
    .unwrap();

    assert_eq!(servers[0].graceful_stops(), 1);
    assert_eq!(servers[0].stops(), 1);
    assert_eq!(servers[0].state(), ServerState::Stopped);
}

#[test]
fn states_render_for_logs() {
    assert_eq!(ServerState::Created.to_string(), "created");
    assert_eq!(ServerState::GracefullyStopped.as_str(), "gracefully_stopped");
    assert!(ServerState::Stopped.is_terminal());
    assert!(!ServerState::Listening.is_terminal());
}
