//! Recording fakes for the hardware seams.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use tokio::{sync::mpsc, time::Instant};
use velux_common::{RemoteButton, RuntimeConfig};

use crate::{
    context::DeviceContext,
    hw::{
        BrokerLink, ClimateSensor, InboundMessage, LinkError, NetworkError, NetworkLink,
        PublishError, RemoteError, RemoteOutputs, SensorError, StatePublisher,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub button: RemoteButton,
    pub high: bool,
    pub at: Instant,
}

#[derive(Clone, Default)]
pub struct RecordingRemote {
    log: Arc<Mutex<Vec<LevelChange>>>,
    failures: Arc<AtomicU32>,
}

impl RecordingRemote {
    pub fn fail_next_writes(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn changes(&self) -> Vec<LevelChange> {
        self.log.lock().unwrap().clone()
    }

    pub fn levels(&self) -> Vec<(RemoteButton, bool)> {
        self.changes()
            .into_iter()
            .map(|change| (change.button, change.high))
            .collect()
    }

    /// Instants at which `button` was asserted.
    pub fn presses(&self, button: RemoteButton) -> Vec<Instant> {
        self.changes()
            .into_iter()
            .filter(|change| change.button == button && change.high == button.level(true))
            .map(|change| change.at)
            .collect()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }
}

impl RemoteOutputs for RecordingRemote {
    fn set_level(&mut self, button: RemoteButton, high: bool) -> Result<(), RemoteError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RemoteError {
                button,
                reason: "injected".into(),
            });
        }
        self.log.lock().unwrap().push(LevelChange {
            button,
            high,
            at: Instant::now(),
        });
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingPublisher {
    log: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingPublisher {
    pub fn published(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().clone()
    }

    pub fn payloads_for(&self, topic: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|(published, _)| published == topic)
            .map(|(_, payload)| payload)
            .collect()
    }
}

impl StatePublisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        self.log
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

pub struct ScriptedSensor {
    readings: VecDeque<Result<(f32, f32), SensorError>>,
}

impl ScriptedSensor {
    pub fn new(readings: Vec<Result<(f32, f32), SensorError>>) -> Self {
        Self {
            readings: readings.into(),
        }
    }
}

impl ClimateSensor for ScriptedSensor {
    fn read(&mut self) -> Result<(f32, f32), SensorError> {
        self.readings
            .pop_front()
            .unwrap_or_else(|| Err(SensorError("script exhausted".into())))
    }
}

pub struct ScriptedNetwork {
    pub up: bool,
    pub delay_ms: u64,
}

impl NetworkLink for ScriptedNetwork {
    async fn connect(&mut self) -> Result<(), NetworkError> {
        tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        if self.up {
            Ok(())
        } else {
            Err(NetworkError::Association("no access point".into()))
        }
    }
}

/// Broker fake: connect results are scripted, inbound traffic and session
/// drops are pushed through [`ScriptedLink::inbound`].
pub struct ScriptedLink {
    connects: VecDeque<bool>,
    pub attempts: Arc<AtomicU32>,
    pub subscriptions: Arc<Mutex<Vec<Vec<String>>>>,
    inbound: mpsc::UnboundedReceiver<Result<InboundMessage, LinkError>>,
}

pub struct LinkProbe {
    pub attempts: Arc<AtomicU32>,
    pub subscriptions: Arc<Mutex<Vec<Vec<String>>>>,
    pub inbound: mpsc::UnboundedSender<Result<InboundMessage, LinkError>>,
}

impl LinkProbe {
    pub fn send(&self, topic: &str, payload: &str) {
        let _ = self.inbound.send(Ok(InboundMessage {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        }));
    }

    pub fn drop_session(&self) {
        let _ = self
            .inbound
            .send(Err(LinkError::Dropped("test drop".into())));
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ScriptedLink {
    /// `connects[i]` is the outcome of attempt `i`; attempts past the end fail.
    pub fn new(connects: Vec<bool>) -> (Self, LinkProbe) {
        let (tx, rx) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicU32::new(0));
        let subscriptions = Arc::new(Mutex::new(Vec::new()));
        let link = Self {
            connects: connects.into(),
            attempts: attempts.clone(),
            subscriptions: subscriptions.clone(),
            inbound: rx,
        };
        let probe = LinkProbe {
            attempts,
            subscriptions,
            inbound: tx,
        };
        (link, probe)
    }
}

impl BrokerLink for ScriptedLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.connects.pop_front().unwrap_or(false) {
            Ok(())
        } else {
            Err(LinkError::Refused("scripted refusal".into()))
        }
    }

    fn subscribe(&mut self, topics: &[String]) -> Result<(), LinkError> {
        self.subscriptions.lock().unwrap().push(topics.to_vec());
        Ok(())
    }

    async fn next_message(&mut self) -> Result<InboundMessage, LinkError> {
        match self.inbound.recv().await {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}

pub fn context_with(
    config: RuntimeConfig,
) -> (Arc<DeviceContext>, RecordingRemote, RecordingPublisher) {
    let remote = RecordingRemote::default();
    let publisher = RecordingPublisher::default();
    let ctx = DeviceContext::new(config, Box::new(remote.clone()), Arc::new(publisher.clone()));
    (ctx, remote, publisher)
}
