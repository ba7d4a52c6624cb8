use serde::{Deserialize, Serialize};

/// GPIO wiring of the remote's contacts plus the timing of a press.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Number of window ids, including the trailing "all covers" alias.
    pub window_count: usize,
    pub select_next_pin: i32,
    pub select_previous_pin: i32,
    pub open_pin: i32,
    pub close_pin: i32,
    pub reset_pin: i32,
    /// Contacts wired to the board but never pressed; held low so they cannot float.
    #[serde(default)]
    pub parked_pins: Vec<i32>,
    pub click_ms: u64,
    pub select_settle_ms: u64,
    pub travel_ms: u64,
    pub reset_hold_ms: u64,
    pub remote_boot_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            window_count: 5,
            select_next_pin: 19,
            select_previous_pin: 22,
            open_pin: 18,
            close_pin: 17,
            reset_pin: 16,
            parked_pins: vec![23, 21, 5],
            click_ms: 300,
            select_settle_ms: 600,
            travel_ms: 28_000,
            reset_hold_ms: 500,
            remote_boot_ms: 12_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    /// Broker session identity. Fixed per device.
    pub device_name: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.2".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            device_name: "Velux2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectivityConfig {
    pub network_timeout_ms: u64,
    pub max_broker_attempts: u32,
    pub broker_backoff_ms: u64,
    pub deep_sleep_wake_ms: u64,
    /// How long a reporter tick waits for a triggered reconnect before skipping.
    pub reconnect_wait_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            network_timeout_ms: 60_000,
            max_broker_attempts: 12,
            broker_backoff_ms: 30_000,
            deep_sleep_wake_ms: 2_000,
            reconnect_wait_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReporterConfig {
    pub interval_ms: u64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self { interval_ms: 60_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub reporter: ReporterConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.remote.sanitize();
        self.connectivity.sanitize();
        self.reporter.interval_ms = self.reporter.interval_ms.max(1_000);
    }
}

impl RemoteConfig {
    pub fn sanitize(&mut self) {
        // One real cover plus the alias is the smallest meaningful remote.
        self.window_count = self.window_count.clamp(2, 16);
        self.click_ms = self.click_ms.clamp(50, 5_000);
        if self.select_settle_ms < self.click_ms {
            self.select_settle_ms = self.click_ms;
        }

        let defaults = Self::default();
        for (pin, fallback) in [
            (&mut self.select_next_pin, defaults.select_next_pin),
            (&mut self.select_previous_pin, defaults.select_previous_pin),
            (&mut self.open_pin, defaults.open_pin),
            (&mut self.close_pin, defaults.close_pin),
            (&mut self.reset_pin, defaults.reset_pin),
        ] {
            if *pin < 0 {
                *pin = fallback;
            }
        }
        self.parked_pins.retain(|pin| *pin >= 0);
    }

    /// Id of the "all covers" alias.
    pub fn alias_id(&self) -> usize {
        self.window_count - 1
    }
}

impl ConnectivityConfig {
    pub fn sanitize(&mut self) {
        self.max_broker_attempts = self.max_broker_attempts.max(1);
        self.network_timeout_ms = self.network_timeout_ms.max(1_000);
    }
}
