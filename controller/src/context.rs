use std::{sync::Arc, time::Duration};

use tokio::sync::{watch, Mutex, Notify};
use velux_common::{ConnectionState, RuntimeConfig, SensorReading, WindowStates};

use crate::{
    actuation::ActuationSerializer,
    hw::{RemoteOutputs, StatePublisher},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectivityStatus {
    pub network: ConnectionState,
    pub broker: ConnectionState,
}

/// Everything the device shares between its timer, message and connectivity
/// flows. Built once per run and handed to every component.
pub struct DeviceContext {
    config: RuntimeConfig,
    windows: Mutex<WindowStates>,
    sensor: Mutex<SensorReading>,
    serializer: ActuationSerializer,
    status: watch::Sender<ConnectivityStatus>,
    reconnect: Notify,
    publisher: Arc<dyn StatePublisher>,
}

impl DeviceContext {
    pub fn new(
        config: RuntimeConfig,
        remote: Box<dyn RemoteOutputs>,
        publisher: Arc<dyn StatePublisher>,
    ) -> Arc<Self> {
        let window_count = config.remote.window_count;
        let serializer = ActuationSerializer::new(remote, config.remote.clone());
        let (status, _) = watch::channel(ConnectivityStatus::default());

        Arc::new(Self {
            config,
            windows: Mutex::new(WindowStates::new(window_count)),
            sensor: Mutex::new(SensorReading::default()),
            serializer,
            status,
            reconnect: Notify::new(),
            publisher,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn window_count(&self) -> usize {
        self.config.remote.window_count
    }

    pub fn windows(&self) -> &Mutex<WindowStates> {
        &self.windows
    }

    pub fn sensor(&self) -> &Mutex<SensorReading> {
        &self.sensor
    }

    pub fn serializer(&self) -> &ActuationSerializer {
        &self.serializer
    }

    pub fn publisher(&self) -> &dyn StatePublisher {
        self.publisher.as_ref()
    }

    pub fn connectivity(&self) -> ConnectivityStatus {
        *self.status.borrow()
    }

    pub fn broker_connected(&self) -> bool {
        self.connectivity().broker == ConnectionState::Connected
    }

    pub fn watch_connectivity(&self) -> watch::Receiver<ConnectivityStatus> {
        self.status.subscribe()
    }

    pub fn set_network_state(&self, state: ConnectionState) {
        self.status.send_if_modified(|status| {
            let changed = status.network != state;
            status.network = state;
            changed
        });
    }

    pub fn set_broker_state(&self, state: ConnectionState) {
        self.status.send_if_modified(|status| {
            let changed = status.broker != state;
            status.broker = state;
            changed
        });
    }

    /// Cuts a pending broker backoff short. No effect while an attempt runs.
    pub fn request_reconnect(&self) {
        self.reconnect.notify_waiters();
    }

    pub(crate) async fn reconnect_requested(&self) {
        self.reconnect.notified().await;
    }

    /// Waits until the broker session is up, giving up after `wait`.
    pub async fn wait_for_broker(&self, wait: Duration) -> bool {
        let mut status = self.watch_connectivity();
        let connected = status.wait_for(|status| status.broker == ConnectionState::Connected);
        let outcome = tokio::time::timeout(wait, connected).await;
        matches!(outcome, Ok(Ok(_)))
    }
}
