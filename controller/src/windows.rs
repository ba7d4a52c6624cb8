use std::time::Duration;

use tracing::{debug, info, warn};
use velux_common::{
    percent_topic, remote::command_pulse, state_topic, WindowCommand, WindowId, WindowStatePayload,
};

use crate::{actuation::Actuator, context::DeviceContext, hw::StatePublisher};

/// Publishes the percent and binary state topics for one window id.
pub fn publish_window_state(publisher: &dyn StatePublisher, index: usize, open: bool) {
    let payload = WindowStatePayload::for_open(open);
    for (topic, value) in [
        (percent_topic(index), payload.percent),
        (state_topic(index), payload.state),
    ] {
        if let Err(err) = publisher.publish(&topic, value) {
            warn!("publish {topic} failed: {err}");
        }
    }
}

/// Drives one open or close of a cover (or of every cover via the alias).
///
/// Takes the actuator by `&mut`, so a caller can only get here while holding
/// the serializer; the whole sequence including travel runs under it.
pub struct WindowController<'a> {
    ctx: &'a DeviceContext,
}

impl<'a> WindowController<'a> {
    pub fn new(ctx: &'a DeviceContext) -> Self {
        Self { ctx }
    }

    pub async fn open(&self, actuator: &mut Actuator, id: WindowId) {
        self.apply(actuator, id, WindowCommand::Open).await;
    }

    pub async fn close(&self, actuator: &mut Actuator, id: WindowId) {
        self.apply(actuator, id, WindowCommand::Close).await;
    }

    pub async fn apply(&self, actuator: &mut Actuator, id: WindowId, command: WindowCommand) {
        let window_count = self.ctx.window_count();
        let alias = id.is_alias(window_count);

        let snapshot = {
            let mut windows = self.ctx.windows().lock().await;
            windows.apply(id, command);
            windows.snapshot()
        };

        // The alias has no selector slot; the remote sends to whatever it
        // currently points at.
        if !alias {
            match actuator.tracker().plan(id) {
                Ok(plan) if plan.is_noop() => {
                    debug!(cursor = plan.target, "selector already on target");
                }
                Ok(plan) => {
                    info!(
                        from = actuator.tracker().cursor(),
                        to = plan.target,
                        steps = plan.steps,
                        direction = ?plan.direction,
                        "moving selector"
                    );
                    let actions = plan.actions(actuator.config());
                    actuator.run(actions).await;
                    actuator.tracker_mut().complete(&plan);
                }
                Err(err) => warn!("{err}"),
            }
        }

        info!(window = %id, command = command.as_str(), alias, "actuating");
        let pulse = command_pulse(command.is_open(), actuator.config());
        actuator.run(pulse).await;

        if self.ctx.broker_connected() {
            let publisher = self.ctx.publisher();
            if alias {
                for (index, open) in snapshot.iter().copied().enumerate() {
                    publish_window_state(publisher, index, open);
                }
            } else {
                publish_window_state(publisher, id.index(), command.is_open());
            }
        } else {
            debug!(window = %id, "broker down, state left for the next report");
        }

        let travel = actuator.config().travel_ms;
        tokio::time::sleep(Duration::from_millis(travel)).await;
    }
}
