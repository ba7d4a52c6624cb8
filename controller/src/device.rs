//! One run of the device, from remote reset to the escalation that ends it.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinError,
    time::Instant,
};
use tracing::{debug, info, warn};
use velux_common::{remote::reset_sequence, ConnectionState, WindowId};

use crate::{
    context::DeviceContext,
    dispatcher::{CommandDispatcher, DispatchOutcome},
    hw::{BrokerLink, ClimateSensor, InboundMessage, NetworkLink},
    reporter::StateReporter,
    supervisor::{bring_up_network, ConnectivitySupervisor, Escalation},
    windows::WindowController,
};

/// Runs startup and then serves until connectivity escalates. The caller
/// turns the returned escalation into a deep sleep.
pub async fn run_device<N, L, S>(
    ctx: Arc<DeviceContext>,
    mut network: N,
    link: L,
    sensor: S,
) -> Escalation
where
    N: NetworkLink,
    L: BrokerLink,
    S: ClimateSensor,
{
    let remote_ready = reset_remote(&ctx).await;

    if let Err(escalation) = bring_up_network(&ctx, &mut network).await {
        return escalation;
    }

    if remote_ready > Instant::now() {
        info!("waiting for the remote to finish rebooting");
    }
    tokio::time::sleep_until(remote_ready).await;

    // Taken before the session exists so the startup close is the first
    // operation on the remote.
    let mut actuator = ctx.serializer().acquire().await;

    let mut supervisor = tokio::spawn(supervise(ctx.clone(), link));
    let mut status = ctx.watch_connectivity();
    let connected = async move {
        status
            .wait_for(|status| status.broker == ConnectionState::Connected)
            .await
            .is_ok()
    };
    tokio::select! {
        up = connected => {
            if !up {
                supervisor.abort();
                return Escalation::SupervisorFailed("connectivity channel closed".into());
            }
        }
        outcome = &mut supervisor => return joined(outcome),
    }

    info!("closing every cover");
    WindowController::new(&ctx)
        .close(&mut actuator, WindowId::alias(ctx.window_count()))
        .await;
    drop(actuator);

    let reporter = tokio::spawn(StateReporter::new(ctx.clone(), sensor).run());
    let escalation = joined(supervisor.await);
    reporter.abort();
    escalation
}

/// Parks every contact and reboots the remote. Returns when it is ready for
/// input again.
async fn reset_remote(ctx: &DeviceContext) -> Instant {
    let mut actuator = ctx.serializer().acquire().await;
    actuator.park();
    info!("resetting remote");
    let actions = reset_sequence(actuator.config());
    actuator.run(actions).await;
    Instant::now() + Duration::from_millis(actuator.config().remote_boot_ms)
}

/// Inbound commands waiting behind the one being actuated.
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Runs the broker session and hands inbound messages, in arrival order, to
/// a single dispatch loop. The loop shares the session's future and ends
/// with it.
async fn supervise<L: BrokerLink>(ctx: Arc<DeviceContext>, link: L) -> Escalation {
    let dispatcher = CommandDispatcher::new(ctx.clone());
    let (queue, mut inbound) = mpsc::channel::<InboundMessage>(COMMAND_QUEUE_DEPTH);

    let session = ConnectivitySupervisor::new(ctx, link).run(move |message| {
        match queue.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                warn!(topic = %message.topic, "command queue full, dropped");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    });
    let commands = async move {
        while let Some(message) = inbound.recv().await {
            if let DispatchOutcome::Actuated { id, command } = dispatcher.dispatch(message).await {
                debug!(window = %id, command = command.as_str(), "command finished");
            }
        }
    };

    tokio::select! {
        escalation = session => escalation,
        () = commands => Escalation::SupervisorFailed("command queue closed".into()),
    }
}

fn joined(outcome: Result<Escalation, JoinError>) -> Escalation {
    outcome.unwrap_or_else(|err| {
        warn!("connectivity supervisor task ended: {err}");
        Escalation::SupervisorFailed(err.to_string())
    })
}
