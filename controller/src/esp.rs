use core::convert::TryInto;
use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::{FreeRtos, BLOCK},
    gpio::{AnyIOPin, AnyOutputPin, IOPin, Output, PinDriver},
    i2c::{I2cConfig, I2cDriver, I2C0},
    units::Hertz,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    sntp::{EspSntp, SyncStatus},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use tokio::sync::{mpsc, oneshot};

use velux_common::{am2320, NetworkConfig, RemoteButton, RemoteConfig, RuntimeConfig};

use crate::{
    context::DeviceContext,
    device::run_device,
    hw::{
        BrokerLink, ClimateSensor, InboundMessage, LinkError, NetworkError, NetworkLink,
        PublishError, RemoteError, RemoteOutputs, SensorError, StatePublisher,
    },
};

const NVS_NAMESPACE: &str = "velux";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const SNTP_POLL_MS: u64 = 500;
const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(30);

type Wifi = BlockingWifi<EspWifi<'static>>;
type SharedClient = Arc<Mutex<Option<EspMqttClient<'static>>>>;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut runtime = load_runtime_config(&nvs_partition).unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    ensure_wifi_defaults(&mut runtime);
    runtime.sanitize();

    info!(
        "config loaded: ssid=`{}`, mqtt=`{}:{}`, device=`{}`, windows={}",
        runtime.network.wifi_ssid,
        runtime.network.mqtt_host,
        runtime.network.mqtt_port,
        runtime.network.device_name,
        runtime.remote.window_count,
    );

    let Peripherals {
        modem, i2c0, pins, ..
    } = Peripherals::take()?;

    let remote = EspRemote::new(&runtime.remote).context("failed to claim remote contact pins")?;
    let sensor = Am2320Sensor::new(i2c0, pins.gpio12.downgrade(), pins.gpio14.downgrade())
        .context("failed to start AM2320 i2c bus")?;

    let esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;
    let network = EspNetwork {
        pending: Some((wifi, runtime.network.clone())),
        up: None,
    };

    let client: SharedClient = Arc::new(Mutex::new(None));
    let link = EspBrokerLink {
        network: runtime.network.clone(),
        client: client.clone(),
        events: None,
    };

    let wake_ms = runtime.connectivity.deep_sleep_wake_ms;
    let ctx = DeviceContext::new(runtime, Box::new(remote), Arc::new(EspPublisher { client }));

    let escalation = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?
        .block_on(run_device(ctx, network, link, sensor));

    warn!("{escalation}; deep sleep for {wake_ms} ms");
    enter_deep_sleep(wake_ms)
}

fn enter_deep_sleep(wake_ms: u64) -> ! {
    unsafe {
        esp_idf_svc::sys::esp_sleep_enable_timer_wakeup(wake_ms.saturating_mul(1_000));
        esp_idf_svc::sys::esp_deep_sleep_start()
    }
}

fn load_runtime_config(partition: &EspDefaultNvsPartition) -> anyhow::Result<RuntimeConfig> {
    let nvs = EspNvs::new(partition.clone(), NVS_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; 4096];

    match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
        Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
        None => Ok(RuntimeConfig::default()),
    }
}

fn ensure_wifi_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }
}

/// Push-pull outputs wired across the remote's contacts.
struct EspRemote {
    contacts: Vec<(RemoteButton, PinDriver<'static, AnyOutputPin, Output>)>,
    _parked: Vec<PinDriver<'static, AnyOutputPin, Output>>,
}

impl EspRemote {
    fn new(config: &RemoteConfig) -> anyhow::Result<Self> {
        let mut contacts = Vec::with_capacity(RemoteButton::ALL.len());
        for button in RemoteButton::ALL {
            let pin = button.pin(config);
            let driver = unsafe { PinDriver::output(AnyOutputPin::new(pin)) }
                .with_context(|| format!("GPIO{pin} for {button:?}"))?;
            contacts.push((button, driver));
        }

        let mut parked = Vec::with_capacity(config.parked_pins.len());
        for pin in &config.parked_pins {
            match unsafe { PinDriver::output(AnyOutputPin::new(*pin)) } {
                Ok(mut driver) => {
                    if let Err(err) = driver.set_low() {
                        warn!("failed to drive parked GPIO{pin} low: {err}");
                    }
                    parked.push(driver);
                }
                Err(err) => warn!("parked GPIO{pin} unavailable: {err}"),
            }
        }

        Ok(Self {
            contacts,
            _parked: parked,
        })
    }
}

impl RemoteOutputs for EspRemote {
    fn set_level(&mut self, button: RemoteButton, high: bool) -> Result<(), RemoteError> {
        let (_, driver) = self
            .contacts
            .iter_mut()
            .find(|(contact, _)| *contact == button)
            .ok_or_else(|| RemoteError {
                button,
                reason: "contact not wired".into(),
            })?;
        let result = if high {
            driver.set_high()
        } else {
            driver.set_low()
        };
        result.map_err(|err| RemoteError {
            button,
            reason: err.to_string(),
        })
    }
}

struct Am2320Sensor {
    i2c: I2cDriver<'static>,
}

impl Am2320Sensor {
    fn new(i2c: I2C0, sda: AnyIOPin, scl: AnyIOPin) -> anyhow::Result<Self> {
        let config = I2cConfig::new().baudrate(Hertz(100_000));
        Ok(Self {
            i2c: I2cDriver::new(i2c, sda, scl, &config)?,
        })
    }
}

impl ClimateSensor for Am2320Sensor {
    fn read(&mut self) -> Result<(f32, f32), SensorError> {
        // The sensor sleeps between reads and NAKs the wake-up write.
        let _ = self.i2c.write(am2320::I2C_ADDRESS, &[], BLOCK);
        FreeRtos::delay_ms(1);

        self.i2c
            .write(am2320::I2C_ADDRESS, &am2320::READ_REQUEST, BLOCK)
            .map_err(|err| SensorError(format!("request: {err}")))?;
        FreeRtos::delay_ms(2);

        let mut frame = [0_u8; am2320::RESPONSE_LEN];
        self.i2c
            .read(am2320::I2C_ADDRESS, &mut frame, BLOCK)
            .map_err(|err| SensorError(format!("response: {err}")))?;
        am2320::decode(&frame).map_err(|err| SensorError(err.to_string()))
    }
}

/// Wi-Fi station plus SNTP. The blocking driver calls run on their own
/// thread so the connect timeout stays enforceable.
struct EspNetwork {
    pending: Option<(Wifi, NetworkConfig)>,
    up: Option<(Wifi, EspSntp<'static>)>,
}

impl NetworkLink for EspNetwork {
    async fn connect(&mut self) -> Result<(), NetworkError> {
        let Some((wifi, network)) = self.pending.take() else {
            return match self.up {
                Some(_) => Ok(()),
                None => Err(NetworkError::Association("wifi driver lost".into())),
            };
        };

        let (tx, rx) = oneshot::channel();
        thread::Builder::new()
            .name("wifi-up".into())
            .stack_size(8 * 1024)
            .spawn(move || {
                let _ = tx.send(join_station(wifi, &network));
            })
            .map_err(|err| NetworkError::Association(err.to_string()))?;

        match rx.await {
            Ok(Ok(up)) => {
                self.up = Some(up);
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(NetworkError::Association("wifi thread ended".into())),
        }
    }
}

fn join_station(
    mut wifi: Wifi,
    network: &NetworkConfig,
) -> Result<(Wifi, EspSntp<'static>), NetworkError> {
    let association = |err: anyhow::Error| NetworkError::Association(format!("{err:#}"));

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };
    let configuration = Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| association(anyhow!("wifi ssid too long")))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| association(anyhow!("wifi password too long")))?,
        auth_method,
        ..Default::default()
    });

    wifi.set_configuration(&configuration)
        .map_err(|err| association(err.into()))?;
    wifi.start().map_err(|err| association(err.into()))?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);
    wifi.connect().map_err(|err| association(err.into()))?;
    wifi.wait_netif_up()
        .map_err(|err| association(err.into()))?;
    info!("wifi connected and netif up");

    let sntp = EspSntp::new_default().map_err(|err| association(err.into()))?;
    let started = Instant::now();
    while sntp.get_sync_status() != SyncStatus::Completed {
        thread::sleep(Duration::from_millis(SNTP_POLL_MS));
    }
    info!("SNTP synced after {} ms", started.elapsed().as_millis());

    Ok((wifi, sntp))
}

enum MqttEvent {
    Connected,
    Disconnected,
    Message(InboundMessage),
    Error(String),
}

/// esp-mqtt session. The client is created on the first connect so it only
/// starts dialing once the station is up; afterwards it redials on its own and
/// each `connect` waits for the next session outcome.
struct EspBrokerLink {
    network: NetworkConfig,
    client: SharedClient,
    events: Option<mpsc::UnboundedReceiver<MqttEvent>>,
}

impl EspBrokerLink {
    fn start_client(&mut self) -> Result<(), LinkError> {
        let (client, conn) = create_mqtt_client(&self.network)
            .map_err(|err| LinkError::Refused(format!("{err:#}")))?;
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_mqtt_receiver(conn, tx).map_err(|err| LinkError::Refused(err.to_string()))?;

        let mut slot = self
            .client
            .lock()
            .map_err(|_| LinkError::Refused("mqtt client lock poisoned".into()))?;
        *slot = Some(client);
        self.events = Some(rx);
        Ok(())
    }
}

impl BrokerLink for EspBrokerLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        if self.events.is_none() {
            self.start_client()?;
        }
        let Some(events) = self.events.as_mut() else {
            return Err(LinkError::Refused("mqtt client not started".into()));
        };

        loop {
            match events.recv().await {
                Some(MqttEvent::Connected) => return Ok(()),
                Some(MqttEvent::Disconnected) => {
                    return Err(LinkError::Refused("broker connection failed".into()))
                }
                Some(MqttEvent::Error(err)) => warn!("mqtt error while connecting: {err}"),
                Some(MqttEvent::Message(_)) => {}
                None => return Err(LinkError::Refused("mqtt receiver ended".into())),
            }
        }
    }

    fn subscribe(&mut self, topics: &[String]) -> Result<(), LinkError> {
        let mut slot = self.client.lock().map_err(|_| LinkError::Subscribe {
            topic: String::new(),
            reason: "mqtt client lock poisoned".into(),
        })?;
        let client = slot.as_mut().ok_or_else(|| LinkError::Subscribe {
            topic: String::new(),
            reason: "mqtt client not started".into(),
        })?;
        for topic in topics {
            client
                .subscribe(topic, QoS::AtMostOnce)
                .map_err(|err| LinkError::Subscribe {
                    topic: topic.clone(),
                    reason: err.to_string(),
                })?;
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Result<InboundMessage, LinkError> {
        let Some(events) = self.events.as_mut() else {
            return Err(LinkError::Dropped("mqtt client not started".into()));
        };
        loop {
            match events.recv().await {
                Some(MqttEvent::Message(message)) => return Ok(message),
                Some(MqttEvent::Disconnected) => {
                    return Err(LinkError::Dropped("broker disconnected".into()))
                }
                Some(MqttEvent::Error(err)) => warn!("mqtt error: {err}"),
                Some(MqttEvent::Connected) => {}
                None => return Err(LinkError::Dropped("mqtt receiver ended".into())),
            }
        }
    }
}

fn create_mqtt_client(
    network: &NetworkConfig,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port);

    let conf = MqttClientConfiguration {
        client_id: Some(network.device_name.as_str()),
        username: if network.mqtt_user.is_empty() {
            None
        } else {
            Some(network.mqtt_user.as_str())
        },
        password: if network.mqtt_pass.is_empty() {
            None
        } else {
            Some(network.mqtt_pass.as_str())
        },
        keep_alive_interval: Some(MQTT_KEEP_ALIVE),
        ..Default::default()
    };

    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

fn spawn_mqtt_receiver(
    mut conn: EspMqttConnection,
    events: mpsc::UnboundedSender<MqttEvent>,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(8 * 1024)
        .spawn(move || loop {
            let event = match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => MqttEvent::Connected,
                    EventPayload::Disconnected => MqttEvent::Disconnected,
                    EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details: Details::Complete,
                        ..
                    } => MqttEvent::Message(InboundMessage {
                        topic: topic.to_string(),
                        payload: data.to_vec(),
                    }),
                    EventPayload::Error(err) => MqttEvent::Error(format!("{err:?}")),
                    _ => continue,
                },
                Err(err) => {
                    warn!("mqtt connection closed: {err:?}");
                    break;
                }
            };
            if events.send(event).is_err() {
                break;
            }
        })?;
    Ok(())
}

struct EspPublisher {
    client: SharedClient,
}

impl StatePublisher for EspPublisher {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let mut slot = self.client.lock().map_err(|_| PublishError::Rejected {
            topic: topic.to_string(),
            reason: "mqtt client lock poisoned".into(),
        })?;
        let client = slot.as_mut().ok_or(PublishError::NotConnected)?;
        client
            .enqueue(topic, QoS::AtMostOnce, false, payload.as_bytes())
            .map(|_| ())
            .map_err(|err| PublishError::Rejected {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }
}
