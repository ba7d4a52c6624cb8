use std::{sync::Arc, time::Duration};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use velux_common::{TOPIC_SENSOR_HUMIDITY, TOPIC_SENSOR_TEMP};

use crate::{context::DeviceContext, hw::ClimateSensor, windows::publish_window_state};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published { climate: bool },
    /// Broker stayed down through the reconnect wait.
    Skipped,
}

/// Timer-driven publication of the climate reading and every window's
/// commanded state. Never waits on the actuation serializer.
pub struct StateReporter<S> {
    ctx: Arc<DeviceContext>,
    sensor: S,
}

impl<S: ClimateSensor> StateReporter<S> {
    pub fn new(ctx: Arc<DeviceContext>, sensor: S) -> Self {
        Self { ctx, sensor }
    }

    pub async fn run(mut self) {
        let period = Duration::from_millis(self.ctx.config().reporter.interval_ms);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let busy = self.ctx.serializer().is_busy();
            let outcome = self.tick().await;
            debug!(?outcome, busy, "report tick");
        }
    }

    pub async fn tick(&mut self) -> TickOutcome {
        if !self.ctx.broker_connected() {
            info!("broker down at report tick, requesting reconnect");
            self.ctx.request_reconnect();
            let wait = Duration::from_millis(self.ctx.config().connectivity.reconnect_wait_ms);
            if !self.ctx.wait_for_broker(wait).await {
                warn!("broker still down, skipping report");
                return TickOutcome::Skipped;
            }
        }

        let reading = {
            let mut reading = self.ctx.sensor().lock().await;
            match self.sensor.read() {
                Ok((temperature_c, humidity_pct)) => {
                    reading.record_success(temperature_c, humidity_pct)
                }
                Err(err) => {
                    warn!("{err}");
                    reading.record_failure();
                }
            }
            *reading
        };

        let publisher = self.ctx.publisher();
        if reading.valid {
            for (topic, value) in [
                (TOPIC_SENSOR_HUMIDITY, reading.humidity_pct),
                (TOPIC_SENSOR_TEMP, reading.temperature_c),
            ] {
                if let Err(err) = publisher.publish(topic, &format!("{value:.1}")) {
                    warn!("publish {topic} failed: {err}");
                }
            }
        }

        let windows = self.ctx.windows().lock().await.snapshot();
        for (index, open) in windows.into_iter().enumerate() {
            publish_window_state(publisher, index, open);
        }

        TickOutcome::Published {
            climate: reading.valid,
        }
    }
}
