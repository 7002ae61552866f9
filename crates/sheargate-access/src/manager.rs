//! Access manager.
//!
//! A single task owns the access state and reacts to one input at a time:
//!
//! ```text
//!   card events ─────┐
//!   relay commands ──┤
//!   I/O connection ──┤
//!   channel cache ───┼──► select! ──► StateMachine ──► IoHandle (relay, LEDs)
//!   session deadline ┤                    │
//!   deny pulse end ──┤                    ├──► watch<ManagerView>
//!   sensor samples ──┘                    └──► watch<RecentEventsLog>
//! ```
//!
//! The relay is only ever driven from here, manual relay requests included,
//! so there is never more than one session and never a relock racing an
//! unlock. When the I/O module goes
//! away the manager makes one best-effort relay-off attempt, enters `Error`
//! and stays silent until the module is back and a baseline read succeeds.

use crate::{
    allow_list::{AllowList, Verdict},
    control::ControlError,
    policy::{DeniedAttemptPolicy, NoLockout},
    recent::RecentEventsLog,
    sampler::SensorSample,
    session::{AccessSession, SessionState},
    state_machine::{AccessState, StateMachine},
};
use chrono::Local;
use serde::Serialize;
use sheargate_core::{
    AccessConfig, AccessDecision, CardEvent, Channel, ChannelValue, ConfirmPolicy,
    constants::{COMPONENT_ACCESS_MANAGER, REASON_SESSION_ACTIVE, REASON_SYSTEM_FAULT},
};
use sheargate_hardware::{ConnState, HardwareError, IoHandle};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// What the outside world may see of the manager.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManagerView {
    pub state: AccessState,
    pub session: Option<AccessSession>,
    /// Relay or green LED still need switching off.
    pub relock_pending: bool,
    pub fault_reason: Option<String>,
}

/// Read side of the manager, handed to the status aggregator.
#[derive(Debug, Clone)]
pub struct ManagerWatch {
    pub view: watch::Receiver<ManagerView>,
    pub recent: watch::Receiver<RecentEventsLog>,
}

/// Relay requests from the control surface.
#[derive(Debug)]
pub enum ManagerCommand {
    /// Open a manual session: relay and green LED on for `duration`.
    Unlock {
        duration: Duration,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
    /// End any session now and switch the relay off.
    Lock {
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
}

/// Inputs consumed by [`AccessManager::run`].
#[derive(Debug)]
pub struct ManagerInputs {
    pub cards: mpsc::Receiver<CardEvent>,
    pub commands: mpsc::Receiver<ManagerCommand>,
    pub samples: watch::Receiver<SensorSample>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[derive(Debug)]
pub struct AccessManager {
    io: IoHandle,
    allow_list: AllowList,
    policy: Box<dyn DeniedAttemptPolicy>,
    unlock_window: Duration,
    deny_pulse: Duration,
    confirm_policy: ConfirmPolicy,

    machine: StateMachine,
    session: Option<AccessSession>,
    session_deadline: Option<Instant>,
    deny_pulse_until: Option<Instant>,
    red_led_pending_off: bool,
    relock_pending: bool,
    fault_reason: Option<String>,
    door_closed: Option<bool>,
    sequence: u64,

    view: watch::Sender<ManagerView>,
    recent: watch::Sender<RecentEventsLog>,
}

impl AccessManager {
    pub fn new(config: &AccessConfig, allow_list: AllowList, io: IoHandle) -> (Self, ManagerWatch) {
        let (view, view_rx) = watch::channel(ManagerView::default());
        let (recent, recent_rx) = watch::channel(RecentEventsLog::new(config.recent_capacity));

        let manager = Self {
            io,
            allow_list,
            policy: Box::new(NoLockout),
            unlock_window: config.unlock_window,
            deny_pulse: config.deny_pulse,
            confirm_policy: config.confirm_policy,
            machine: StateMachine::new(),
            session: None,
            session_deadline: None,
            deny_pulse_until: None,
            red_led_pending_off: false,
            relock_pending: false,
            fault_reason: None,
            door_closed: None,
            sequence: 0,
            view,
            recent,
        };

        (
            manager,
            ManagerWatch {
                view: view_rx,
                recent: recent_rx,
            },
        )
    }

    pub fn with_policy(mut self, policy: Box<dyn DeniedAttemptPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Run until `cancel` fires, then relock.
    pub async fn run(mut self, inputs: ManagerInputs, cancel: CancellationToken) {
        let ManagerInputs {
            mut cards,
            mut commands,
            mut samples,
        } = inputs;
        let mut connection = self.io.connection().clone();
        let mut channels = self.io.subscribe_state();

        let mut cards_open = true;
        let mut commands_open = true;
        let mut samples_open = true;
        let mut connection_open = true;
        let mut channels_open = true;

        info!(component = COMPONENT_ACCESS_MANAGER, cards = self.allow_list.len(), "Access manager started");
        self.door_closed = self.io.door_closed(&channels.borrow_and_update());
        if self.io.latest_state() != ConnState::Connected {
            self.enter_error("io module not connected", false).await;
        }
        self.publish();

        loop {
            let session_deadline = self.session_deadline;
            let deny_pulse_until = self.deny_pulse_until;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                state = connection.changed(), if connection_open => match state {
                    Some(state) => self.on_connection(state).await,
                    None => connection_open = false,
                },
                changed = channels.changed(), if channels_open => {
                    if changed.is_err() {
                        channels_open = false;
                        continue;
                    }
                    let closed = self.io.door_closed(&channels.borrow_and_update());
                    if let Some(closed) = closed {
                        self.on_door(closed).await;
                    }
                },
                _ = sleep_until_opt(session_deadline) => self.on_session_expired().await,
                _ = sleep_until_opt(deny_pulse_until) => self.end_deny_pulse().await,
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command).await,
                    None => commands_open = false,
                },
                event = cards.recv(), if cards_open => match event {
                    Some(event) => self.on_card(event).await,
                    None => {
                        debug!(component = COMPONENT_ACCESS_MANAGER, "Card event channel closed");
                        cards_open = false;
                    }
                },
                changed = samples.changed(), if samples_open => {
                    if changed.is_err() {
                        samples_open = false;
                        continue;
                    }
                    self.on_sample().await;
                },
            }
        }

        self.shutdown().await;
    }

    async fn on_card(&mut self, event: CardEvent) {
        let state = self.machine.current_state();
        info!(
            component = COMPONENT_ACCESS_MANAGER,
            card_id = %event.card_id,
            state = %state,
            "Card presented"
        );

        match state {
            AccessState::Idle => self.authorize(event).await,
            AccessState::Error => {
                let decision = self.deny(&event, REASON_SYSTEM_FAULT);
                warn!(component = COMPONENT_ACCESS_MANAGER, card_id = %event.card_id, "Card denied, system fault");
                self.record(event, decision);
            }
            _ => {
                let decision = self.deny(&event, REASON_SESSION_ACTIVE);
                info!(component = COMPONENT_ACCESS_MANAGER, card_id = %event.card_id, "Card ignored, session active");
                self.record(event, decision);
            }
        }
    }

    async fn authorize(&mut self, event: CardEvent) {
        self.transition(AccessState::AwaitingAuthorization);

        let verdict = self.allow_list.authorize(&event.card_id, &Local::now());
        match verdict {
            Verdict::Granted => {
                self.sequence += 1;
                let decision =
                    AccessDecision::granted(self.sequence, event.card_id.clone(), verdict.reason());
                info!(
                    component = COMPONENT_ACCESS_MANAGER,
                    card_id = %event.card_id,
                    sequence = decision.sequence,
                    "Access granted"
                );
                let session = AccessSession::open(event.card_id.clone(), self.unlock_window);
                self.record(event, decision);
                self.unlock(session, self.unlock_window).await;
            }
            Verdict::Denied(reason) => {
                let decision = self.deny(&event, reason);
                warn!(
                    component = COMPONENT_ACCESS_MANAGER,
                    card_id = %event.card_id,
                    reason,
                    "Access denied"
                );
                self.policy.on_denied(&decision);
                self.record(event, decision);
                self.transition(AccessState::Idle);
                self.start_deny_pulse().await;
            }
        }
    }

    fn deny(&mut self, event: &CardEvent, reason: &str) -> AccessDecision {
        self.sequence += 1;
        AccessDecision::denied(self.sequence, event.card_id.clone(), reason)
    }

    fn record(&mut self, event: CardEvent, decision: AccessDecision) {
        self.recent.send_modify(|log| {
            log.push(event, decision);
        });
    }

    async fn unlock(&mut self, session: AccessSession, window: Duration) {
        if self.deny_pulse_until.take().is_some() {
            self.switch_off(Channel::LedRed).await;
        }

        self.transition(AccessState::Unlocking);
        self.session = Some(session);
        self.session_deadline = Some(Instant::now() + window);
        self.publish();

        for channel in [Channel::UnlockRelay, Channel::LedGreen] {
            if let Err(e) = self.io.write(channel, ChannelValue::Digital(true)).await {
                self.output_failed(channel, e).await;
                return;
            }
        }
        info!(
            component = COMPONENT_ACCESS_MANAGER,
            window = ?window,
            "Unlocked, relay on"
        );

        if self.confirm_policy == ConfirmPolicy::Timer || self.door_closed == Some(false) {
            self.confirm_open();
        }
    }

    async fn on_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Unlock { duration, reply } => {
                let result = self.manual_unlock(duration).await;
                let _ = reply.send(result);
            }
            ManagerCommand::Lock { reply } => {
                let result = self.force_lock().await;
                let _ = reply.send(result);
            }
        }
    }

    async fn manual_unlock(&mut self, duration: Duration) -> Result<(), ControlError> {
        match self.machine.current_state() {
            AccessState::Idle => {}
            AccessState::Error => return Err(ControlError::Rejected(REASON_SYSTEM_FAULT)),
            _ => return Err(ControlError::Rejected(REASON_SESSION_ACTIVE)),
        }

        info!(component = COMPONENT_ACCESS_MANAGER, duration = ?duration, "Manual unlock requested");
        self.transition(AccessState::AwaitingAuthorization);
        self.unlock(AccessSession::manual(duration), duration).await;

        if self.machine.current_state() == AccessState::Error {
            return Err(ControlError::Rejected("unlock command failed"));
        }
        Ok(())
    }

    async fn force_lock(&mut self) -> Result<(), ControlError> {
        match self.machine.current_state() {
            AccessState::Unlocking | AccessState::Unlocked => {
                self.relock("forced lock").await;
                if self.relock_pending {
                    return Err(ControlError::Rejected("relock failed"));
                }
                Ok(())
            }
            AccessState::Error if self.relock_pending => {
                Err(ControlError::Rejected(REASON_SYSTEM_FAULT))
            }
            _ => {
                // No session: make sure the relay is released anyway.
                self.switch_outputs_off().await?;
                info!(component = COMPONENT_ACCESS_MANAGER, "Forced lock, relay off");
                Ok(())
            }
        }
    }

    fn confirm_open(&mut self) {
        self.transition(AccessState::Unlocked);
        self.set_session_state(SessionState::Unlocked);
        self.publish();
    }

    async fn on_door(&mut self, closed: bool) {
        let previous = self.door_closed.replace(closed);
        if previous == Some(closed) {
            return;
        }
        debug!(component = COMPONENT_ACCESS_MANAGER, closed, "Door sensor changed");

        match (self.machine.current_state(), closed) {
            (AccessState::Unlocking, false) => {
                info!(component = COMPONENT_ACCESS_MANAGER, "Door opened");
                self.confirm_open();
            }
            (AccessState::Unlocked, true) => self.relock("door closed").await,
            _ => {}
        }
    }

    async fn on_session_expired(&mut self) {
        self.session_deadline = None;
        if matches!(
            self.machine.current_state(),
            AccessState::Unlocking | AccessState::Unlocked
        ) {
            self.relock("unlock window elapsed").await;
        }
    }

    async fn relock(&mut self, cause: &'static str) {
        self.session_deadline = None;
        self.transition(AccessState::Relocking);
        self.set_session_state(SessionState::Relocking);
        self.publish();
        info!(component = COMPONENT_ACCESS_MANAGER, cause, "Relocking");

        match self.switch_outputs_off().await {
            Ok(()) => {
                self.close_session();
                self.transition(AccessState::Idle);
                info!(component = COMPONENT_ACCESS_MANAGER, "Locked");
            }
            Err(e) => {
                self.relock_pending = true;
                error!(component = COMPONENT_ACCESS_MANAGER, error = %e, "Relock failed");
                self.enter_error("relock failed", false).await;
            }
        }
    }

    /// Relay off first, then green LED.
    async fn switch_outputs_off(&self) -> Result<(), HardwareError> {
        self.io
            .write(Channel::UnlockRelay, ChannelValue::Digital(false))
            .await?;
        self.io
            .write(Channel::LedGreen, ChannelValue::Digital(false))
            .await
    }

    async fn switch_off(&mut self, channel: Channel) {
        if let Err(e) = self.io.write(channel, ChannelValue::Digital(false)).await {
            warn!(component = COMPONENT_ACCESS_MANAGER, channel = %channel, error = %e, "Output off failed");
            if channel == Channel::LedRed {
                self.red_led_pending_off = true;
            }
        }
    }

    async fn output_failed(&mut self, channel: Channel, e: HardwareError) {
        error!(
            component = COMPONENT_ACCESS_MANAGER,
            channel = %channel,
            error = %e,
            "Output command failed during unlock"
        );
        self.enter_error("unlock command failed", true).await;
    }

    async fn start_deny_pulse(&mut self) {
        match self.io.write(Channel::LedRed, ChannelValue::Digital(true)).await {
            Ok(()) => self.deny_pulse_until = Some(Instant::now() + self.deny_pulse),
            Err(e) => {
                warn!(component = COMPONENT_ACCESS_MANAGER, error = %e, "Red LED pulse failed");
            }
        }
    }

    async fn end_deny_pulse(&mut self) {
        self.deny_pulse_until = None;
        self.switch_off(Channel::LedRed).await;
    }

    /// Stop driving outputs until the module is back.
    ///
    /// With `attempt_relay_off` a session in progress gets exactly one
    /// best-effort relay-off command on the way in.
    async fn enter_error(&mut self, reason: &str, attempt_relay_off: bool) {
        if self.machine.current_state() == AccessState::Error {
            return;
        }

        self.session_deadline = None;
        if self.deny_pulse_until.take().is_some() {
            self.red_led_pending_off = true;
        }
        if self.session.is_some() {
            self.relock_pending = true;
            self.set_session_state(SessionState::Relocking);
        }

        self.fault_reason = Some(reason.to_string());
        self.transition(AccessState::Error);
        error!(component = COMPONENT_ACCESS_MANAGER, reason, "System fault, outputs suppressed");

        if attempt_relay_off && self.relock_pending {
            match self
                .io
                .write(Channel::UnlockRelay, ChannelValue::Digital(false))
                .await
            {
                Ok(()) => info!(component = COMPONENT_ACCESS_MANAGER, "Relay released during fault"),
                Err(e) => {
                    warn!(component = COMPONENT_ACCESS_MANAGER, error = %e, "Relay release failed during fault");
                }
            }
        }
        self.publish();
    }

    async fn on_connection(&mut self, state: ConnState) {
        debug!(component = COMPONENT_ACCESS_MANAGER, io_module = %state, "I/O module state");
        match state {
            ConnState::Disconnected => {
                let active = self.session.is_some();
                self.enter_error("io module disconnected", active).await;
            }
            ConnState::Connected => self.try_recover().await,
            ConnState::Connecting => {}
        }
    }

    async fn on_sample(&mut self) {
        if self.machine.current_state() == AccessState::Error {
            self.try_recover().await;
        }
    }

    /// Leave `Error` once the module answers again.
    async fn try_recover(&mut self) {
        if self.machine.current_state() != AccessState::Error
            || self.io.latest_state() != ConnState::Connected
        {
            return;
        }

        if self.relock_pending {
            if let Err(e) = self.switch_outputs_off().await {
                warn!(component = COMPONENT_ACCESS_MANAGER, error = %e, "Relock retry failed");
                return;
            }
            self.relock_pending = false;
            self.close_session();
            info!(component = COMPONENT_ACCESS_MANAGER, "Pending relock completed");
        }

        if self.red_led_pending_off {
            if let Err(e) = self
                .io
                .write(Channel::LedRed, ChannelValue::Digital(false))
                .await
            {
                warn!(component = COMPONENT_ACCESS_MANAGER, error = %e, "Red LED reset failed");
                return;
            }
            self.red_led_pending_off = false;
        }

        match self.io.read_all().await {
            Ok(channels) => {
                self.door_closed = self.io.door_closed(&channels);
                self.fault_reason = None;
                self.transition(AccessState::Idle);
                info!(component = COMPONENT_ACCESS_MANAGER, "I/O module recovered, back to idle");
            }
            Err(e) => {
                warn!(component = COMPONENT_ACCESS_MANAGER, error = %e, "Baseline read failed");
            }
        }
    }

    async fn shutdown(&mut self) {
        info!(component = COMPONENT_ACCESS_MANAGER, state = %self.machine.current_state(), "Access manager stopping");

        if self.deny_pulse_until.take().is_some() {
            self.switch_off(Channel::LedRed).await;
        }

        match self.machine.current_state() {
            AccessState::Unlocking | AccessState::Unlocked => {
                self.relock("shutdown").await;
            }
            AccessState::Error if self.relock_pending => {
                match self.switch_outputs_off().await {
                    Ok(()) => {
                        self.relock_pending = false;
                        self.close_session();
                    }
                    Err(e) => {
                        error!(component = COMPONENT_ACCESS_MANAGER, error = %e, "Relock on shutdown failed");
                    }
                }
            }
            _ => {}
        }

        self.publish();
        info!(component = COMPONENT_ACCESS_MANAGER, "Access manager stopped");
    }

    fn set_session_state(&mut self, state: SessionState) {
        if let Some(session) = &mut self.session {
            session.state = state;
        }
    }

    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.state = SessionState::Closed;
            debug!(component = COMPONENT_ACCESS_MANAGER, session_id = %session.id, "Session closed");
        }
        self.session_deadline = None;
    }

    fn transition(&mut self, next: AccessState) {
        match self.machine.transition_to(next) {
            Ok(transition) => trace!(
                component = COMPONENT_ACCESS_MANAGER,
                from = %transition.from,
                to = %transition.to,
                "State transition"
            ),
            Err(e) => warn!(component = COMPONENT_ACCESS_MANAGER, error = %e, "Transition rejected"),
        }
        self.publish();
    }

    fn publish(&self) {
        self.view.send_replace(ManagerView {
            state: self.machine.current_state(),
            session: self.session.clone(),
            relock_pending: self.relock_pending,
            fault_reason: self.fault_reason.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheargate_core::{CardEntryConfig, CardId, IoModuleConfig, WatchdogConfig};
    use sheargate_hardware::{IoModule, devices::AnyIoTransport, mock::MockIoModule};

    #[tokio::test(start_paused = true)]
    async fn test_cards_denied_while_io_module_absent() {
        let (module, mock) = MockIoModule::new();
        mock.disconnect();
        let (adapter, io) = IoModule::new(&IoModuleConfig::default(), AnyIoTransport::Mock(module));
        let io_task = adapter.start(WatchdogConfig::default(), &CancellationToken::new());

        let card = CardId::new("A1B2C3").unwrap();
        let allow_list = AllowList::from_config(&[CardEntryConfig::new(card.clone())]).unwrap();
        let (manager, observed) = AccessManager::new(&AccessConfig::default(), allow_list, io);

        let (cards_tx, cards_rx) = mpsc::channel(4);
        let (commands_tx, commands_rx) = mpsc::channel(4);
        let (_samples_tx, samples_rx) = watch::channel(SensorSample::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(manager.run(
            ManagerInputs {
                cards: cards_rx,
                commands: commands_rx,
                samples: samples_rx,
            },
            cancel.clone(),
        ));

        cards_tx.send(CardEvent::new(card, vec![0x41u8])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let view = observed.view.borrow().clone();
        assert_eq!(view.state, AccessState::Error);
        assert!(view.session.is_none());
        assert_eq!(view.fault_reason.as_deref(), Some("io module not connected"));

        let log = observed.recent.borrow().clone();
        let entry = log.latest().unwrap();
        assert!(!entry.decision.is_granted());
        assert_eq!(entry.decision.reason, REASON_SYSTEM_FAULT);
        assert!(mock.writes().is_empty());

        let (reply, outcome) = oneshot::channel();
        commands_tx
            .send(ManagerCommand::Unlock {
                duration: Duration::from_secs(3),
                reply,
            })
            .await
            .unwrap();
        let err = outcome.await.unwrap().unwrap_err();
        assert!(matches!(err, ControlError::Rejected(REASON_SYSTEM_FAULT)));
        assert!(mock.writes().is_empty());

        cancel.cancel();
        task.await.unwrap();
        io_task.stop().await;
    }

    #[tokio::test]
    async fn test_view_serializes() {
        let view = ManagerView::default();
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["relock_pending"], false);
    }
}
