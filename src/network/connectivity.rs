use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::network::NetworkError;
use crate::sync::SyncCoordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    /// Nothing probed yet.
    Unknown,
    Online,
    Offline,
}

/// Raw platform signals. Being associated with a network is not enough; the
/// device is online only when the internet is reachable through it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectivitySnapshot {
    pub is_connected: bool,
    pub is_internet_reachable: bool,
}

impl ConnectivitySnapshot {
    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_internet_reachable
    }

    pub fn status(&self) -> NetworkStatus {
        if self.is_online() {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        }
    }
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self) -> ConnectivitySnapshot;
}

/// Read side of the connectivity state.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    rx: watch::Receiver<NetworkStatus>,
}

impl ConnectivityHandle {
    pub fn status(&self) -> NetworkStatus {
        *self.rx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status() == NetworkStatus::Online
    }

    /// Wait for the next transition. `None` once the monitor is gone.
    pub async fn changed(&mut self) -> Option<NetworkStatus> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

/// Create the connectivity state in the `Unknown` state. The sender goes to
/// the [`NetworkMonitor`], handles go to everyone who needs to read it.
pub fn connectivity_channel() -> (watch::Sender<NetworkStatus>, ConnectivityHandle) {
    let (tx, rx) = watch::channel(NetworkStatus::Unknown);
    (tx, ConnectivityHandle { rx })
}

/// Probes the network with a route lookup and a health request.
pub struct ReachabilityProbe {
    route_target: SocketAddr,
    health_url: String,
    http: reqwest::Client,
}

impl ReachabilityProbe {
    pub fn new(
        route_target: SocketAddr,
        health_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            route_target,
            health_url: health_url.into(),
            http,
        })
    }

    /// Whether the OS has a route towards `target`. Connecting a UDP socket
    /// only selects the route and interface; no packet is sent.
    pub async fn has_route(target: SocketAddr) -> bool {
        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = match UdpSocket::bind(bind_addr).await {
            Ok(s) => s,
            Err(_) => return false,
        };
        socket.connect(target).await.is_ok()
    }

    pub async fn is_reachable(&self) -> bool {
        match self.http.get(&self.health_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                log::debug!("Health probe to {} failed: {}", self.health_url, e);
                false
            }
        }
    }
}

#[async_trait]
impl ConnectivityProbe for ReachabilityProbe {
    async fn probe(&self) -> ConnectivitySnapshot {
        let is_connected = Self::has_route(self.route_target).await;
        let is_internet_reachable = is_connected && self.is_reachable().await;

        ConnectivitySnapshot {
            is_connected,
            is_internet_reachable,
        }
    }
}

/// Watches connectivity and triggers a sync when the device comes online
/// with queued work. It never queues or retries anything itself.
pub struct NetworkMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    status: watch::Sender<NetworkStatus>,
    coordinator: Arc<SyncCoordinator>,
}

impl NetworkMonitor {
    pub fn new(
        probe: Arc<dyn ConnectivityProbe>,
        status: watch::Sender<NetworkStatus>,
        coordinator: Arc<SyncCoordinator>,
    ) -> Self {
        Self {
            probe,
            status,
            coordinator,
        }
    }

    pub fn status(&self) -> NetworkStatus {
        *self.status.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status() == NetworkStatus::Online
    }

    pub fn subscribe(&self) -> ConnectivityHandle {
        ConnectivityHandle {
            rx: self.status.subscribe(),
        }
    }

    /// Probe once, publish a transition if there was one and, on a transition
    /// to online with a non-empty queue, start a sync in the background.
    pub async fn check_once(&self) -> NetworkStatus {
        let snapshot = self.probe.probe().await;
        let next = snapshot.status();

        let mut previous = next;
        self.status.send_if_modified(|current| {
            previous = *current;
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });

        if previous != next {
            log::info!(
                "Connectivity changed: {:?} -> {:?} (connected={}, reachable={})",
                previous,
                next,
                snapshot.is_connected,
                snapshot.is_internet_reachable
            );

            if next == NetworkStatus::Online && self.coordinator.queued_count() > 0 {
                log::info!(
                    "Back online with {} queued actions, requesting sync",
                    self.coordinator.queued_count()
                );
                self.spawn_sync();
            }
        }

        next
    }

    /// The sync runs on its own task so probing continues while it is in
    /// flight. Overlapping runs are rejected by the coordinator.
    fn spawn_sync(&self) {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            if let Some(result) = coordinator.sync_if_needed().await {
                log::info!(
                    "Reconnect sync: synced={}, failed={}",
                    result.synced,
                    result.failed
                );
            }
        });
    }

    pub async fn run(self, interval: Duration) {
        loop {
            self.check_once().await;
            sleep(interval).await;
        }
    }
}
