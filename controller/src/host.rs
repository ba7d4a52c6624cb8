use std::{io::ErrorKind, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::{Datelike, Utc};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, QoS};
use tracing::{debug, info, warn};
use velux_common::{RemoteButton, RemoteConfig, RuntimeConfig};

use crate::{
    context::DeviceContext,
    device::run_device,
    hw::{
        BrokerLink, ClimateSensor, InboundMessage, LinkError, NetworkError, NetworkLink,
        PublishError, RemoteError, RemoteOutputs, SensorError, StatePublisher,
    },
    supervisor::Escalation,
};

const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(30);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut runtime = load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime.sanitize();

    let wake = Duration::from_millis(runtime.connectivity.deep_sleep_wake_ms);
    loop {
        let escalation = tokio::select! {
            escalation = run_once(&runtime) => escalation,
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        };

        // Host stand-in for deep sleep: the whole device state is gone and
        // startup runs again from the remote reset.
        warn!("{escalation}; deep sleep for {} ms", wake.as_millis());
        tokio::time::sleep(wake).await;
        info!("woke from deep sleep, restarting");
    }
}

async fn run_once(runtime: &RuntimeConfig) -> Escalation {
    let network = &runtime.network;
    let mut mqtt_options = MqttOptions::new(
        network.device_name.clone(),
        network.mqtt_host.clone(),
        network.mqtt_port,
    );
    mqtt_options.set_keep_alive(MQTT_KEEP_ALIVE);
    if !network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
    }
    let (client, eventloop) = AsyncClient::new(mqtt_options, 64);

    let ctx = DeviceContext::new(
        runtime.clone(),
        Box::new(SimulatedRemote::new(&runtime.remote)),
        Arc::new(MqttPublisher {
            client: client.clone(),
        }),
    );
    let host_network = HostNetwork {
        broker: format!("{}:{}", network.mqtt_host, network.mqtt_port),
    };
    let link = RumqttLink { client, eventloop };

    run_device(ctx, host_network, link, SimulatedClimate::default()).await
}

fn data_dir() -> PathBuf {
    std::env::var("VELUX_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.velux"))
}

async fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let path = data_dir().join("runtime.json");
    match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid runtime config at {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, var: impl Fn(&str) -> Option<String>) {
    let network = &mut runtime.network;
    if let Some(host) = var("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = var("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        network.mqtt_port = port;
    }
    if let Some(user) = var("MQTT_USER") {
        network.mqtt_user = user;
    }
    if let Some(pass) = var("MQTT_PASS") {
        network.mqtt_pass = pass;
    }
    if let Some(name) = var("VELUX_DEVICE_NAME") {
        network.device_name = name;
    }
}

/// Stands in for the GPIO lines; logs every level change.
struct SimulatedRemote {
    config: RemoteConfig,
}

impl SimulatedRemote {
    fn new(config: &RemoteConfig) -> Self {
        for pin in &config.parked_pins {
            debug!(pin, "parked pin held low");
        }
        Self {
            config: config.clone(),
        }
    }
}

impl RemoteOutputs for SimulatedRemote {
    fn set_level(&mut self, button: RemoteButton, high: bool) -> Result<(), RemoteError> {
        info!(pin = button.pin(&self.config), ?button, high, "gpio");
        Ok(())
    }
}

/// Slow drift around a comfortable room climate.
#[derive(Default)]
struct SimulatedClimate {
    reads: u32,
}

impl ClimateSensor for SimulatedClimate {
    fn read(&mut self) -> Result<(f32, f32), SensorError> {
        self.reads = self.reads.wrapping_add(1);
        let phase = (self.reads % 20) as f32 / 20.0 * std::f32::consts::TAU;
        Ok((21.0 + phase.sin(), 45.0 + 5.0 * phase.cos()))
    }
}

/// Resolves the broker and waits for a plausible wall clock.
struct HostNetwork {
    broker: String,
}

impl NetworkLink for HostNetwork {
    async fn connect(&mut self) -> Result<(), NetworkError> {
        loop {
            let resolved = tokio::net::lookup_host(self.broker.as_str())
                .await
                .map(|mut addrs| addrs.next().is_some());
            match resolved {
                Ok(true) if Utc::now().year() >= 2024 => return Ok(()),
                Ok(true) => debug!("waiting for wall clock"),
                Ok(false) => debug!(broker = %self.broker, "broker address not resolved yet"),
                Err(err) if err.kind() == ErrorKind::InvalidInput => {
                    return Err(NetworkError::Association(format!(
                        "broker address `{}`: {err}",
                        self.broker
                    )));
                }
                Err(err) => debug!(broker = %self.broker, "lookup failed: {err}"),
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

struct MqttPublisher {
    client: AsyncClient,
}

impl StatePublisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|err| PublishError::Rejected {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }
}

struct RumqttLink {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl BrokerLink for RumqttLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(LinkError::Refused(format!("{:?}", ack.code)))
                    };
                }
                Ok(_) => {}
                Err(err) => return Err(LinkError::Refused(err.to_string())),
            }
        }
    }

    fn subscribe(&mut self, topics: &[String]) -> Result<(), LinkError> {
        for topic in topics {
            self.client
                .try_subscribe(topic.as_str(), QoS::AtMostOnce)
                .map_err(|err| LinkError::Subscribe {
                    topic: topic.clone(),
                    reason: err.to_string(),
                })?;
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Result<InboundMessage, LinkError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    return Ok(InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    return Err(LinkError::Dropped("broker sent disconnect".into()));
                }
                Ok(_) => {}
                Err(err) => return Err(LinkError::Dropped(err.to_string())),
            }
        }
    }
}
