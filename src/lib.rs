//! `faultline`: a fault-management runtime that tracks boolean fault
//! conditions ("alarms") for a process, with managed alarms whose state is
//! derived from a compiled expression over other alarms' states, time
//! windows, counts, and durations (SPEC_FULL.md §1).
//!
//! The public surface is [`Faultline`]: spawn one with [`Faultline::spawn`],
//! then `set_alarm`/`clear_alarm`/`subscribe` against it. Managed alarms are
//! compiled with [`compiler::compile`] from an [`ast::Expr`] (or parsed from
//! the wire format in [`wire`]) and installed with
//! [`Faultline::add_managed_alarm`].

pub mod ast;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod id;
pub mod level;
pub mod matcher;
pub mod ops;
pub mod remedy;
pub mod state;
pub mod store;
pub mod supervisor;
pub mod timestamp;
pub mod window;
pub mod wire;

use std::sync::Arc;
use std::time::Duration;

pub use ast::{Expr, IdElem, IdRef, Style};
pub use compiler::CompiledCondition;
pub use config::Config;
pub use engine::Action;
pub use error::{FaultlineError, FaultlineResult};
pub use id::{AlarmId, Atom};
pub use level::Level;
pub use matcher::{Pattern, PatternElem};
pub use remedy::RemedySpec;
pub use state::{AlarmRecord, AlarmState, Event};
pub use timestamp::{Clock, ManualClock, SystemClock, Timestamp};

use handler::{HandlerHandle, InitialAlarm, InitialCondition};
use store::Store;
use supervisor::SupervisorHandle;

/// The default deadline admin calls (`add_managed_alarm`,
/// `remove_managed_alarm`, `managed_alarm_ids`) retry against before failing
/// with [`FaultlineError::HandlerUnavailable`] (SPEC_FULL.md §4.6, §7).
pub const DEFAULT_ADMIN_DEADLINE: Duration = Duration::from_secs(5);

/// The runtime's public handle: a Store plus the running Handler and remedy
/// Supervisor tasks behind it. Cheaply clonable — every clone talks to the
/// same underlying tasks (SPEC_FULL.md §2, §6).
#[derive(Clone)]
pub struct Faultline {
    store: Arc<Store>,
    handler: HandlerHandle,
    admin_deadline: Duration,
}

impl Faultline {
    /// Spawns the Store, Handler, and remedy Supervisor tasks and returns a
    /// handle to them, seeding `initial_alarms` before `initial_conditions`
    /// are registered (SPEC_FULL.md §4.6).
    pub fn spawn(
        clock: Arc<dyn Clock>,
        initial_alarms: Vec<InitialAlarm>,
        initial_conditions: Vec<InitialCondition>,
    ) -> Self {
        let store = Arc::new(Store::new());
        let supervisor: SupervisorHandle = supervisor::spawn();
        let handler = handler::spawn(store.clone(), supervisor, clock, initial_alarms, initial_conditions);
        Faultline { store, handler, admin_deadline: DEFAULT_ADMIN_DEADLINE }
    }

    /// Spawns with no pre-existing alarms or managed conditions, using the
    /// real system clock — the common case for an embedding application that
    /// registers everything through [`Faultline::add_managed_alarm`] after
    /// startup.
    pub fn spawn_default() -> Self {
        Faultline::spawn(Arc::new(SystemClock), Vec::new(), Vec::new())
    }

    /// Builds a runtime from a loaded [`Config`]: every `managed_alarms`
    /// entry from `compiled` (looked up by id) is installed at startup, and
    /// every `alarm_levels` override is applied once the Handler is live.
    pub async fn spawn_from_config(
        clock: Arc<dyn Clock>,
        config: &Config,
        compiled: impl Fn(&AlarmId) -> Option<CompiledCondition>,
    ) -> Self {
        let initial_conditions = config
            .managed_alarms
            .iter()
            .filter_map(|id| compiled(id).map(|compiled| InitialCondition { id: id.clone(), compiled }))
            .collect();
        let runtime = Faultline::spawn(clock, Vec::new(), initial_conditions);
        for (id, level) in &config.alarm_levels {
            runtime.set_alarm_level(id.clone(), *level).await;
        }
        runtime
    }

    /// Subscribes to every future [`Event`] whose id matches `pattern`.
    pub fn subscribe(&self, pattern: Pattern) -> tokio::sync::broadcast::Receiver<Event> {
        self.store.subscribe(pattern)
    }

    /// Drops every subscription previously registered with an identical
    /// pattern.
    pub fn unsubscribe(&self, pattern: &Pattern) {
        self.store.unsubscribe(pattern);
    }

    pub async fn set_alarm(&self, id: AlarmId, description: Option<String>) {
        self.handler.set_alarm(id, description).await;
    }

    pub async fn clear_alarm(&self, id: AlarmId) {
        self.handler.clear_alarm(id).await;
    }

    /// All alarms at or above `level_filter` in severity (lower variant index
    /// is more severe — SPEC_FULL.md §3).
    pub fn get_alarms(&self, level_filter: Level) -> Vec<(AlarmId, AlarmRecord)> {
        self.store.get_all_at_or_above(level_filter)
    }

    pub fn get_alarm_ids(&self, level_filter: Level) -> Vec<AlarmId> {
        self.get_alarms(level_filter).into_iter().map(|(id, _)| id).collect()
    }

    pub fn alarm_state(&self, id: &AlarmId) -> AlarmState {
        self.store.get(id).map(|r| r.state).unwrap_or(AlarmState::Unknown)
    }

    pub async fn add_managed_alarm(&self, id: AlarmId, compiled: CompiledCondition) -> FaultlineResult<()> {
        self.handler.add_managed_alarm(id, compiled, self.admin_deadline).await
    }

    pub async fn remove_managed_alarm(&self, id: AlarmId) -> FaultlineResult<()> {
        self.handler.remove_managed_alarm(id, self.admin_deadline).await
    }

    pub async fn managed_alarm_ids(&self) -> FaultlineResult<Vec<AlarmId>> {
        self.handler.managed_alarm_ids(self.admin_deadline).await
    }

    pub async fn set_alarm_level(&self, id: AlarmId, level: Level) {
        self.handler.set_alarm_level(id, level).await;
    }

    pub async fn clear_alarm_level(&self, id: AlarmId) {
        self.handler.clear_alarm_level(id).await;
    }

    pub async fn add_remedy(&self, id: AlarmId, spec: RemedySpec) {
        self.handler.add_remedy(id, spec).await;
    }

    pub async fn remove_remedy(&self, id: AlarmId) {
        self.handler.remove_remedy(id).await;
    }

    /// Stops the Handler task. Any live timers are aborted; the Store keeps
    /// whatever state it last held (SPEC_FULL.md §1: no persistence).
    pub async fn stop(&self) {
        self.handler.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn set_then_subscribe_observes_the_alarm() {
        let runtime = Faultline::spawn_default();
        let mut rx = runtime.subscribe(Pattern::atom("pump_failure"));
        runtime.set_alarm(AlarmId::atom("pump_failure"), Some("overpressure".into())).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.state, AlarmState::Set);
        assert_eq!(runtime.alarm_state(&AlarmId::atom("pump_failure")), AlarmState::Set);
    }

    #[tokio::test]
    async fn managed_alarm_lifecycle_round_trips() {
        let runtime = Faultline::spawn_default();
        let derived = AlarmId::atom("derived");
        let compiled =
            compiler::compile(&derived, &Expr::id("A"), Style::Atom, Level::default_leaf()).unwrap();
        runtime.add_managed_alarm(derived.clone(), compiled).await.unwrap();
        assert_eq!(runtime.managed_alarm_ids().await.unwrap(), vec![derived.clone()]);

        runtime.set_alarm(AlarmId::atom("A"), None).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runtime.alarm_state(&derived), AlarmState::Set);

        runtime.remove_managed_alarm(derived.clone()).await.unwrap();
        assert!(runtime.managed_alarm_ids().await.unwrap().is_empty());
        assert_eq!(runtime.alarm_state(&derived), AlarmState::Unknown);
    }
}
