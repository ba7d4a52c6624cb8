use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tracing::{error, info, warn};
use velux_common::{action_topics, ConnectionState, RetryBudget, RetryDecision};

use crate::{
    context::DeviceContext,
    hw::{BrokerLink, InboundMessage, NetworkError, NetworkLink},
};

/// Why a run has to end in deep sleep.
#[derive(Debug, Error)]
pub enum Escalation {
    #[error(transparent)]
    NetworkUnavailable(#[from] NetworkError),
    #[error("broker unreachable after {attempts} attempts")]
    BrokerExhausted { attempts: u32 },
    #[error("connectivity supervisor stopped: {0}")]
    SupervisorFailed(String),
}

/// Single bounded attempt at bringing the station link up.
pub async fn bring_up_network<N: NetworkLink>(
    ctx: &DeviceContext,
    network: &mut N,
) -> Result<(), Escalation> {
    let timeout_ms = ctx.config().connectivity.network_timeout_ms;
    ctx.set_network_state(ConnectionState::Connecting);
    info!(timeout_ms, "bringing up network");

    let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), network.connect())
        .await
        .unwrap_or(Err(NetworkError::Timeout(timeout_ms)));

    match outcome {
        Ok(()) => {
            ctx.set_network_state(ConnectionState::Connected);
            info!("network up");
            Ok(())
        }
        Err(err) => {
            ctx.set_network_state(ConnectionState::Disconnected);
            error!("{err}");
            Err(err.into())
        }
    }
}

/// Owns the broker session: connects with a bounded budget, resubscribes on
/// every new session and hands inbound publishes to the caller.
pub struct ConnectivitySupervisor<L> {
    ctx: Arc<DeviceContext>,
    link: L,
    budget: RetryBudget,
    subscriptions: Vec<String>,
}

impl<L: BrokerLink> ConnectivitySupervisor<L> {
    pub fn new(ctx: Arc<DeviceContext>, link: L) -> Self {
        let budget = RetryBudget::new(&ctx.config().connectivity);
        let subscriptions = action_topics(ctx.window_count());
        Self {
            ctx,
            link,
            budget,
            subscriptions,
        }
    }

    /// Connects and subscribes. Returns an escalation once the budget is spent.
    pub async fn establish(&mut self) -> Result<(), Escalation> {
        self.ctx.set_broker_state(ConnectionState::Connecting);
        loop {
            let attempt = self.budget.current_attempt();
            info!(attempt, max = self.budget.max_attempts(), "connecting to broker");

            let result = match self.link.connect().await {
                Ok(()) => self.link.subscribe(&self.subscriptions),
                Err(err) => Err(err),
            };

            let err = match result {
                Ok(()) => {
                    self.budget.record_success();
                    self.ctx.set_broker_state(ConnectionState::Connected);
                    info!(topics = self.subscriptions.len(), "broker session up");
                    return Ok(());
                }
                Err(err) => err,
            };
            warn!(attempt, "{err}");

            match self.budget.record_failure() {
                RetryDecision::Retry {
                    next_attempt,
                    backoff_ms,
                } => {
                    info!(next_attempt, backoff_ms, "broker backoff");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
                        _ = self.ctx.reconnect_requested() => {
                            info!("reconnect requested, cutting backoff short");
                        }
                    }
                }
                RetryDecision::Exhausted { attempts } => {
                    self.ctx.set_broker_state(ConnectionState::Disconnected);
                    error!(attempts, "broker retry budget exhausted");
                    return Err(Escalation::BrokerExhausted { attempts });
                }
            }
        }
    }

    /// Serves sessions until the budget runs out. A dropped session goes
    /// straight back to broker retries; the network is left alone.
    pub async fn run<F>(mut self, mut on_message: F) -> Escalation
    where
        F: FnMut(InboundMessage) + Send,
    {
        loop {
            if let Err(escalation) = self.establish().await {
                return escalation;
            }
            loop {
                match self.link.next_message().await {
                    Ok(message) => on_message(message),
                    Err(err) => {
                        warn!("{err}");
                        self.ctx.set_broker_state(ConnectionState::Connecting);
                        break;
                    }
                }
            }
        }
    }
}
