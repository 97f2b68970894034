//! The async adapter that drives the pure [`Engine`] from external events
//! (SPEC_FULL.md §4.6). Owns the Engine and the Store, serialises every
//! mutation through a single mailbox (mirroring the teacher's
//! `GroupProcessor` message loop), drives real timers with `tokio::time`,
//! and commits the Engine's actions to the Store and the remedy
//! [`SupervisorHandle`].

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::compiler::CompiledCondition;
use crate::engine::{Action, Engine, TimerToken};
use crate::error::{FaultlineError, FaultlineResult};
use crate::id::AlarmId;
use crate::level::Level;
use crate::remedy::RemedySpec;
use crate::state::AlarmState;
use crate::store::Store;
use crate::supervisor::SupervisorHandle;
use crate::timestamp::Clock;

const MAILBOX_CAPACITY: usize = 1024;

enum HandlerMessage {
    Set { id: AlarmId, description: Option<String> },
    Clear { id: AlarmId },
    Timeout { id: AlarmId, intended_state: AlarmState, token: TimerToken },
    AddManagedAlarm { id: AlarmId, compiled: CompiledCondition, reply: oneshot::Sender<()> },
    RemoveManagedAlarm { id: AlarmId, reply: oneshot::Sender<()> },
    SetAlarmLevel { id: AlarmId, level: Level },
    ClearAlarmLevel { id: AlarmId },
    AddRemedy { id: AlarmId, spec: RemedySpec },
    RemoveRemedy { id: AlarmId },
    ManagedAlarmIds { reply: oneshot::Sender<Vec<AlarmId>> },
    Stop,
}

/// A cheaply-clonable handle to the running Handler task. This is the type
/// the public crate API (`lib.rs`) actually calls into.
#[derive(Clone)]
pub struct HandlerHandle {
    sender: mpsc::Sender<HandlerMessage>,
}

impl HandlerHandle {
    /// Sends `set_alarm`. Fire-and-forget: the compatibility shim in
    /// SPEC_FULL.md §4.6 retries sends while the mailbox is full rather than
    /// failing the caller, so we simply await the (bounded, large) channel.
    pub async fn set_alarm(&self, id: AlarmId, description: Option<String>) {
        let _ = self.sender.send(HandlerMessage::Set { id, description }).await;
    }

    pub async fn clear_alarm(&self, id: AlarmId) {
        let _ = self.sender.send(HandlerMessage::Clear { id }).await;
    }

    /// Admin call: retries delivery until `deadline` elapses, then fails with
    /// [`FaultlineError::HandlerUnavailable`] (SPEC_FULL.md §4.6).
    pub async fn add_managed_alarm(
        &self,
        id: AlarmId,
        compiled: CompiledCondition,
        deadline: std::time::Duration,
    ) -> FaultlineResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_with_deadline(
            HandlerMessage::AddManagedAlarm { id, compiled, reply: reply_tx },
            deadline,
        )
        .await?;
        reply_rx.await.map_err(|_| FaultlineError::HandlerUnavailable)
    }

    pub async fn remove_managed_alarm(
        &self,
        id: AlarmId,
        deadline: std::time::Duration,
    ) -> FaultlineResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_with_deadline(HandlerMessage::RemoveManagedAlarm { id, reply: reply_tx }, deadline)
            .await?;
        reply_rx.await.map_err(|_| FaultlineError::HandlerUnavailable)
    }

    pub async fn set_alarm_level(&self, id: AlarmId, level: Level) {
        let _ = self.sender.send(HandlerMessage::SetAlarmLevel { id, level }).await;
    }

    pub async fn clear_alarm_level(&self, id: AlarmId) {
        let _ = self.sender.send(HandlerMessage::ClearAlarmLevel { id }).await;
    }

    pub async fn add_remedy(&self, id: AlarmId, spec: RemedySpec) {
        let _ = self.sender.send(HandlerMessage::AddRemedy { id, spec }).await;
    }

    pub async fn remove_remedy(&self, id: AlarmId) {
        let _ = self.sender.send(HandlerMessage::RemoveRemedy { id }).await;
    }

    pub async fn managed_alarm_ids(
        &self,
        deadline: std::time::Duration,
    ) -> FaultlineResult<Vec<AlarmId>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_with_deadline(HandlerMessage::ManagedAlarmIds { reply: reply_tx }, deadline)
            .await?;
        reply_rx.await.map_err(|_| FaultlineError::HandlerUnavailable)
    }

    pub async fn stop(&self) {
        let _ = self.sender.send(HandlerMessage::Stop).await;
    }

    async fn send_with_deadline(
        &self,
        message: HandlerMessage,
        deadline: std::time::Duration,
    ) -> FaultlineResult<()> {
        tokio::time::timeout(deadline, self.sender.send(message))
            .await
            .map_err(|_| FaultlineError::HandlerUnavailable)?
            .map_err(|_| FaultlineError::HandlerUnavailable)
    }
}

/// A pre-existing leaf alarm to seed at startup (SPEC_FULL.md §4.6: initial
/// alarms are cached before managed alarms are registered).
pub struct InitialAlarm {
    pub id: AlarmId,
    pub description: Option<String>,
}

/// A managed alarm condition to register at startup.
pub struct InitialCondition {
    pub id: AlarmId,
    pub compiled: CompiledCondition,
}

struct Handler {
    engine: Engine,
    store: Arc<Store>,
    supervisor: SupervisorHandle,
    clock: Arc<dyn Clock>,
    receiver: mpsc::Receiver<HandlerMessage>,
    self_sender: mpsc::Sender<HandlerMessage>,
    timers: std::collections::HashMap<AlarmId, JoinHandle<()>>,
}

impl Handler {
    /// Applies one commit's actions in order, awaiting every Store mutation
    /// and every send to the remedy Supervisor in place rather than
    /// detaching them onto spawned tasks. The Supervisor's mailbox is itself
    /// ordered (SPEC_FULL.md §5: "events for a single alarm_id are delivered
    /// ... in the order they were committed"), so awaiting each send here —
    /// instead of racing a fresh `tokio::spawn` per action — is what actually
    /// preserves that ordering across a commit's Set/Clear/Register/Unregister
    /// actions, and across one id's successive commits.
    async fn apply_actions(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Set { id, description, level } => {
                    debug!(id = %id, ?level, "handler committing Set");
                    self.store.put(&id, AlarmState::Set, description, level, self.clock.now());
                    self.supervisor.notify_set(id).await;
                }
                Action::Clear { id, level } => {
                    debug!(id = %id, "handler committing Clear");
                    self.store.put(&id, AlarmState::Clear, None, level, self.clock.now());
                    self.supervisor.notify_cleared(id).await;
                }
                Action::Forget { id } => {
                    debug!(id = %id, "handler committing Forget");
                    self.store.delete(&id, self.clock.now());
                }
                Action::StartTimer { id, millis, intended_state, token } => {
                    self.start_timer(id, millis, intended_state, token);
                }
                Action::CancelTimer { id } => {
                    if let Some(handle) = self.timers.remove(&id) {
                        handle.abort();
                    }
                }
                Action::RegisterRemedy { id, spec } => {
                    self.supervisor.register(id, spec).await;
                }
                Action::UnregisterRemedy { id } => {
                    self.supervisor.unregister(id).await;
                }
            }
        }
    }

    fn start_timer(&mut self, id: AlarmId, millis: u64, intended_state: AlarmState, token: TimerToken) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
        }
        let sender = self.self_sender.clone();
        let timer_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
            let _ = sender
                .send(HandlerMessage::Timeout { id: timer_id, intended_state, token })
                .await;
        });
        self.timers.insert(id, handle);
    }

    async fn commit(&mut self) {
        let now = self.clock.now();
        let actions = self.engine.commit_side_effects(now, self.store.as_ref());
        self.apply_actions(actions).await;
    }

    async fn run(mut self) {
        while let Some(message) = self.receiver.recv().await {
            let now = self.clock.now();
            match message {
                HandlerMessage::Stop => break,
                HandlerMessage::Set { id, description } => {
                    self.engine.set_alarm(&id, description, now, self.store.as_ref());
                    self.commit().await;
                }
                HandlerMessage::Clear { id } => {
                    self.engine.clear_alarm(&id, now, self.store.as_ref());
                    self.commit().await;
                }
                HandlerMessage::Timeout { id, intended_state, token } => {
                    self.timers.remove(&id);
                    self.engine.handle_timeout(&id, intended_state, token, now, self.store.as_ref());
                    self.commit().await;
                }
                HandlerMessage::AddManagedAlarm { id, compiled, reply } => {
                    self.engine.add_managed_alarm(&id, compiled, now, self.store.as_ref());
                    self.commit().await;
                    let _ = reply.send(());
                }
                HandlerMessage::RemoveManagedAlarm { id, reply } => {
                    self.engine.remove_managed_alarm(&id, now, self.store.as_ref());
                    self.commit().await;
                    let _ = reply.send(());
                }
                HandlerMessage::SetAlarmLevel { id, level } => {
                    self.engine.set_alarm_level(&id, level);
                }
                HandlerMessage::ClearAlarmLevel { id } => {
                    self.engine.clear_alarm_level(&id);
                }
                HandlerMessage::AddRemedy { id, spec } => {
                    self.engine.add_remedy(&id, spec);
                    self.commit().await;
                }
                HandlerMessage::RemoveRemedy { id } => {
                    self.engine.remove_remedy(&id);
                    self.commit().await;
                }
                HandlerMessage::ManagedAlarmIds { reply } => {
                    let _ = reply.send(self.engine.managed_alarm_ids());
                }
            }
        }
        for (id, handle) in self.timers.drain() {
            warn!(id = %id, "handler stopping, aborting live timer");
            handle.abort();
        }
    }
}

/// Spawns the Handler task, seeding `initial_alarms` into the Store before
/// `initial_conditions` are registered so dependent rules see correct inputs
/// on their first evaluation (SPEC_FULL.md §4.6).
pub fn spawn(
    store: Arc<Store>,
    supervisor: SupervisorHandle,
    clock: Arc<dyn Clock>,
    initial_alarms: Vec<InitialAlarm>,
    initial_conditions: Vec<InitialCondition>,
) -> HandlerHandle {
    let now = clock.now();
    for alarm in initial_alarms {
        store.put(&alarm.id, AlarmState::Set, alarm.description, Level::default_leaf(), now);
    }

    let mut engine = Engine::new();
    for condition in initial_conditions {
        engine.add_managed_alarm(&condition.id, condition.compiled, now, store.as_ref());
    }

    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let mut handler = Handler {
        engine,
        store,
        supervisor,
        clock,
        receiver: rx,
        self_sender: tx.clone(),
        timers: std::collections::HashMap::new(),
    };
    // commit the side effects of the initial registration before serving messages.
    let handle = HandlerHandle { sender: tx };
    tokio::spawn(async move {
        handler.commit().await;
        handler.run().await;
    });
    handle
}
