use std::sync::Arc;

use tracing::{debug, info, warn};
use velux_common::{WindowCommand, WindowId};

use crate::{context::DeviceContext, hw::InboundMessage, windows::WindowController};

/// Largest inbound payload accepted on an action topic.
pub const MAX_PAYLOAD_BYTES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Bad topic, bad id or oversized payload.
    Discarded,
    /// Already in the commanded state.
    Unchanged,
    Actuated { id: WindowId, command: WindowCommand },
}

/// Routes inbound action messages to the window controller.
#[derive(Clone)]
pub struct CommandDispatcher {
    ctx: Arc<DeviceContext>,
}

impl CommandDispatcher {
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self { ctx }
    }

    pub async fn dispatch(&self, message: InboundMessage) -> DispatchOutcome {
        self.on_message(&message.topic, &message.payload).await
    }

    pub async fn on_message(&self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        if payload.len() > MAX_PAYLOAD_BYTES {
            warn!(topic, len = payload.len(), "payload too large, dropped");
            return DispatchOutcome::Discarded;
        }

        let id = match WindowId::from_topic(topic, self.ctx.window_count()) {
            Ok(id) => id,
            Err(err) => {
                warn!("discarding command: {err}");
                return DispatchOutcome::Discarded;
            }
        };
        let command = WindowCommand::from_payload(payload);

        if !self.ctx.windows().lock().await.accept(id, command) {
            debug!(window = %id, command = command.as_str(), "already commanded, ignored");
            return DispatchOutcome::Unchanged;
        }

        let mut actuator = self.ctx.serializer().acquire().await;

        // An alias command ahead of this one may already have applied it.
        if !self.ctx.windows().lock().await.needs_change(id, command) {
            debug!(window = %id, command = command.as_str(), "satisfied while queued");
            return DispatchOutcome::Unchanged;
        }

        info!(window = %id, command = command.as_str(), "command accepted");
        let controller = WindowController::new(&self.ctx);
        match command {
            WindowCommand::Open => controller.open(&mut actuator, id).await,
            WindowCommand::Close => controller.close(&mut actuator, id).await,
        }
        DispatchOutcome::Actuated { id, command }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;
    use velux_common::{ConnectionState, RemoteButton, RuntimeConfig};

    use super::*;
    use crate::testing::context_with;

    #[tokio::test(start_paused = true)]
    async fn repeated_command_actuates_once() {
        let (ctx, remote, _) = context_with(RuntimeConfig::default());
        let dispatcher = CommandDispatcher::new(ctx.clone());

        let first = dispatcher.on_message("velux/action2", b"ON").await;
        let second = dispatcher.on_message("velux/action2", b"ON").await;

        assert!(matches!(first, DispatchOutcome::Actuated { .. }));
        assert_eq!(second, DispatchOutcome::Unchanged);
        assert_eq!(remote.presses(RemoteButton::Open).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_duplicate_is_rechecked() {
        let (ctx, remote, _) = context_with(RuntimeConfig::default());
        let dispatcher = CommandDispatcher::new(ctx.clone());

        let a = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.on_message("velux/action1", b"ON").await }
        });
        let b = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.on_message("velux/action1", b"ON").await }
        });

        let outcomes = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(
            outcomes
                .iter()
                .filter(|outcome| matches!(outcome, DispatchOutcome::Actuated { .. }))
                .count(),
            1
        );
        assert_eq!(remote.presses(RemoteButton::Open).len(), 1);
    }

    fn spawn_command(
        dispatcher: &CommandDispatcher,
        topic: &'static str,
        payload: &'static [u8],
    ) -> tokio::task::JoinHandle<DispatchOutcome> {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.on_message(topic, payload).await })
    }

    #[tokio::test(start_paused = true)]
    async fn last_queued_command_wins() {
        let (ctx, remote, _) = context_with(RuntimeConfig::default());
        let dispatcher = CommandDispatcher::new(ctx.clone());

        let busy = ctx.serializer().acquire().await;
        let open = spawn_command(&dispatcher, "velux/action1", b"ON");
        tokio::task::yield_now().await;
        let close = spawn_command(&dispatcher, "velux/action1", b"OFF");
        tokio::task::yield_now().await;
        drop(busy);

        assert_eq!(
            open.await.unwrap(),
            DispatchOutcome::Actuated {
                id: WindowId::new(1, 5).unwrap(),
                command: WindowCommand::Open
            }
        );
        assert_eq!(
            close.await.unwrap(),
            DispatchOutcome::Actuated {
                id: WindowId::new(1, 5).unwrap(),
                command: WindowCommand::Close
            }
        );
        assert!(!ctx.windows().lock().await.is_open(WindowId::new(1, 5).unwrap()));
        let opens = remote.presses(RemoteButton::Open);
        let closes = remote.presses(RemoteButton::Close);
        assert_eq!(opens.len(), 1);
        assert_eq!(closes.len(), 1);
        assert!(closes[0] > opens[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_off_on_off_ends_closed() {
        let (ctx, remote, _) = context_with(RuntimeConfig::default());
        let dispatcher = CommandDispatcher::new(ctx.clone());

        let busy = ctx.serializer().acquire().await;
        let mut queued = Vec::new();
        for payload in [&b"OFF"[..], b"ON", b"OFF"] {
            queued.push(spawn_command(&dispatcher, "velux/action2", payload));
            tokio::task::yield_now().await;
        }
        drop(busy);

        let mut outcomes = Vec::new();
        for task in queued {
            outcomes.push(task.await.unwrap());
        }
        assert_eq!(outcomes[0], DispatchOutcome::Unchanged);
        assert!(matches!(outcomes[1], DispatchOutcome::Actuated { command: WindowCommand::Open, .. }));
        assert!(matches!(outcomes[2], DispatchOutcome::Actuated { command: WindowCommand::Close, .. }));
        assert!(!ctx.windows().lock().await.is_open(WindowId::new(2, 5).unwrap()));
        assert_eq!(remote.presses(RemoteButton::Open).len(), 1);
        assert_eq!(remote.presses(RemoteButton::Close).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_commands_run_back_to_back() {
        let (ctx, remote, _) = context_with(RuntimeConfig::default());
        let dispatcher = CommandDispatcher::new(ctx.clone());
        let config = ctx.config().remote.clone();

        let first = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.on_message("velux/action0", b"ON").await }
        });
        tokio::task::yield_now().await;
        let second = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.on_message("velux/action3", b"ON").await }
        });
        first.await.unwrap();
        second.await.unwrap();

        let opens = remote.presses(RemoteButton::Open);
        assert_eq!(opens.len(), 2);
        let first_done = opens[0] + Duration::from_millis(config.click_ms + config.travel_ms);
        let selects = remote.presses(RemoteButton::SelectNext);
        assert_eq!(selects.len(), 3);
        assert!(selects[0] >= first_done);
        assert!(opens[1] >= first_done);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_ids_are_discarded() {
        let (ctx, remote, _) = context_with(RuntimeConfig::default());
        let dispatcher = CommandDispatcher::new(ctx.clone());

        for topic in ["velux/action5", "velux/action", "velux/actionx", "other/action1"] {
            assert_eq!(
                dispatcher.on_message(topic, b"ON").await,
                DispatchOutcome::Discarded
            );
        }
        assert!(remote.changes().is_empty());
        assert!(!ctx.serializer().is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_payload_is_dropped() {
        let (ctx, remote, _) = context_with(RuntimeConfig::default());
        let dispatcher = CommandDispatcher::new(ctx);

        let payload = vec![b'O'; MAX_PAYLOAD_BYTES + 1];
        assert_eq!(
            dispatcher.on_message("velux/action0", &payload).await,
            DispatchOutcome::Discarded
        );
        assert!(remote.changes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn anything_but_on_closes() {
        let (ctx, remote, _) = context_with(RuntimeConfig::default());
        let dispatcher = CommandDispatcher::new(ctx.clone());

        dispatcher.on_message("velux/action0", b"ON").await;
        let outcome = dispatcher.on_message("velux/action0", b"garbage").await;

        assert!(matches!(
            outcome,
            DispatchOutcome::Actuated {
                command: WindowCommand::Close,
                ..
            }
        ));
        assert_eq!(remote.presses(RemoteButton::Close).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn alias_on_opens_everything() {
        let (ctx, remote, publisher) = context_with(RuntimeConfig::default());
        ctx.set_broker_state(ConnectionState::Connected);
        let dispatcher = CommandDispatcher::new(ctx.clone());

        let start = Instant::now();
        dispatcher
            .dispatch(InboundMessage {
                topic: "velux/action4".into(),
                payload: b"ON".to_vec(),
            })
            .await;

        assert_eq!(ctx.windows().lock().await.snapshot(), vec![true; 5]);
        assert_eq!(remote.presses(RemoteButton::Open).len(), 1);
        for index in 0..5 {
            assert_eq!(
                publisher.payloads_for(&format!("velux/percent{index}")),
                vec!["100"]
            );
            assert_eq!(
                publisher.payloads_for(&format!("velux/state{index}")),
                vec!["ON"]
            );
        }
        assert!(start.elapsed() >= Duration::from_millis(28_000));
    }
}
