//! The pure rule-evaluation core (SPEC_FULL.md §4.3). Accepts inputs and
//! returns `Action`s; all I/O is the Handler's job.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, info, warn};

use crate::compiler::CompiledCondition;
use crate::id::AlarmId;
use crate::level::Level;
use crate::ops::{self, ResolvedInput, Rule, RuleState, TimerInstruction};
use crate::remedy::RemedySpec;
use crate::state::AlarmState;
use crate::timestamp::Timestamp;

/// Supplies the Engine with the Store's current value for an id it has not
/// yet cached this pass (SPEC_FULL.md §4.3.2: "looking it up through
/// `lookup_fun` on first access"). Keeps the Engine itself free of any
/// direct Store reference.
pub trait StoreReader {
    fn read(&self, id: &AlarmId) -> (AlarmState, Option<String>);
}

/// An opaque reference identifying one scheduled timer. Stale deliveries
/// (whose token no longer matches) are dropped (SPEC_FULL.md §4.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// A side effect produced by the Engine for the Handler to execute
/// (SPEC_FULL.md §4.3.3).
#[derive(Debug, Clone)]
pub enum Action {
    Set { id: AlarmId, description: Option<String>, level: Level },
    Clear { id: AlarmId, level: Level },
    Forget { id: AlarmId },
    StartTimer { id: AlarmId, millis: u64, intended_state: AlarmState, token: TimerToken },
    CancelTimer { id: AlarmId },
    RegisterRemedy { id: AlarmId, spec: RemedySpec },
    UnregisterRemedy { id: AlarmId },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ActionKey {
    Set(AlarmId),
    Clear(AlarmId),
    Forget(AlarmId),
    Timer(AlarmId),
    Remedy(AlarmId),
}

fn action_key(action: &Action) -> ActionKey {
    match action {
        Action::Set { id, .. } => ActionKey::Set(id.clone()),
        Action::Clear { id, .. } => ActionKey::Clear(id.clone()),
        Action::Forget { id } => ActionKey::Forget(id.clone()),
        Action::StartTimer { id, .. } | Action::CancelTimer { id } => ActionKey::Timer(id.clone()),
        Action::RegisterRemedy { id, .. } | Action::UnregisterRemedy { id } => ActionKey::Remedy(id.clone()),
    }
}

/// The pure core described in SPEC_FULL.md §3/§4.3. All mutating methods
/// take `now` and a [`StoreReader`] explicitly rather than owning a clock or
/// a Store handle.
#[derive(Default)]
pub struct Engine {
    conditions: HashMap<AlarmId, CompiledCondition>,
    rules_by_input: HashMap<AlarmId, Vec<(AlarmId, Rule)>>,
    cache: HashMap<AlarmId, ResolvedInput>,
    changed_queue: VecDeque<AlarmId>,
    changed_set: HashSet<AlarmId>,
    per_rule_state: HashMap<AlarmId, RuleState>,
    timers: HashMap<AlarmId, TimerToken>,
    next_token: u64,
    action_order: Vec<Option<Action>>,
    action_index: HashMap<ActionKey, usize>,
    alarm_levels: HashMap<AlarmId, Level>,
    default_levels: HashMap<AlarmId, Level>,
}

impl Engine {
    pub fn new() -> Self {
        Engine::default()
    }

    pub fn managed_alarm_ids(&self) -> Vec<AlarmId> {
        self.conditions.keys().cloned().collect()
    }

    pub fn is_managed(&self, id: &AlarmId) -> bool {
        self.conditions.contains_key(id)
    }

    pub fn set_alarm_level(&mut self, id: &AlarmId, level: Level) {
        self.alarm_levels.insert(id.clone(), level);
    }

    pub fn clear_alarm_level(&mut self, id: &AlarmId) {
        self.alarm_levels.remove(id);
    }

    fn level_for(&self, id: &AlarmId) -> Level {
        self.alarm_levels
            .get(id)
            .or_else(|| self.default_levels.get(id))
            .copied()
            .unwrap_or_else(Level::default_leaf)
    }

    pub fn set_alarm(
        &mut self,
        id: &AlarmId,
        description: Option<String>,
        now: Timestamp,
        reader: &dyn StoreReader,
    ) {
        self.cache_put(id, AlarmState::Set, description, reader);
        self.drain(now, reader);
    }

    pub fn clear_alarm(&mut self, id: &AlarmId, now: Timestamp, reader: &dyn StoreReader) {
        self.cache_put(id, AlarmState::Clear, None, reader);
        self.drain(now, reader);
    }

    /// Drives the expiry set/clear directly for `id`, silently dropping the
    /// message if `token` no longer matches the live timer (SPEC_FULL.md
    /// §4.3.1, §4.3.4).
    pub fn handle_timeout(
        &mut self,
        id: &AlarmId,
        intended_state: AlarmState,
        token: TimerToken,
        now: Timestamp,
        reader: &dyn StoreReader,
    ) {
        if self.timers.get(id) != Some(&token) {
            warn!(id = %id, "dropped timeout with stale token");
            return;
        }
        self.timers.remove(id);
        self.cache_put(id, intended_state, None, reader);
        self.drain(now, reader);
    }

    pub fn add_managed_alarm(
        &mut self,
        id: &AlarmId,
        compiled: CompiledCondition,
        now: Timestamp,
        reader: &dyn StoreReader,
    ) {
        if let Some(existing) = self.conditions.get(id) {
            if *existing == compiled {
                return;
            }
            self.remove_managed_alarm(id, now, reader);
        }

        info!(id = %id, rules = compiled.rules.len(), "registering managed alarm");
        self.default_levels.insert(id.clone(), compiled.level);
        for temp in &compiled.temporaries {
            self.default_levels.insert(temp.clone(), Level::default_temporary());
        }

        let mut inputs_to_mark = Vec::new();
        for rule in &compiled.rules {
            for arg in &rule.args {
                self.rules_by_input
                    .entry(arg.clone())
                    .or_default()
                    .push((id.clone(), rule.clone()));
                inputs_to_mark.push(arg.clone());
            }
        }

        self.conditions.insert(id.clone(), compiled);

        for input in inputs_to_mark {
            self.enqueue_changed(input);
        }
        self.drain(now, reader);
    }

    pub fn remove_managed_alarm(&mut self, id: &AlarmId, now: Timestamp, reader: &dyn StoreReader) {
        let Some(compiled) = self.conditions.remove(id) else {
            return;
        };
        info!(id = %id, "removing managed alarm");

        for rule in &compiled.rules {
            for arg in &rule.args {
                if let Some(subs) = self.rules_by_input.get_mut(arg) {
                    subs.retain(|(managed, r)| managed != id || r.dest != rule.dest);
                    if subs.is_empty() {
                        self.rules_by_input.remove(arg);
                    }
                }
            }
        }

        let mut forgotten: Vec<AlarmId> = vec![id.clone()];
        forgotten.extend(compiled.temporaries.iter().cloned());

        for fid in &forgotten {
            let (prior_state, _) = self.cache_get(fid, reader);
            if prior_state == AlarmState::Set {
                let level = self.level_for(fid);
                self.push_action(Action::Clear { id: fid.clone(), level });
            }
            self.push_action(Action::Forget { id: fid.clone() });
            self.cache.remove(fid);
            self.per_rule_state.remove(fid);
            self.default_levels.remove(fid);
            if self.timers.remove(fid).is_some() {
                self.push_action(Action::CancelTimer { id: fid.clone() });
            }
        }
        self.drain(now, reader);
    }

    pub fn add_remedy(&mut self, id: &AlarmId, spec: RemedySpec) {
        self.push_action(Action::RegisterRemedy { id: id.clone(), spec });
    }

    pub fn remove_remedy(&mut self, id: &AlarmId) {
        self.push_action(Action::UnregisterRemedy { id: id.clone() });
    }

    /// Runs rules to fixed point, returns the deduplicated action list in
    /// forward (commit) order, and clears the evaluation cache
    /// (SPEC_FULL.md §4.3.1).
    pub fn commit_side_effects(&mut self, now: Timestamp, reader: &dyn StoreReader) -> Vec<Action> {
        self.drain(now, reader);
        let actions: Vec<Action> = self.action_order.drain(..).flatten().collect();
        self.action_index.clear();
        self.cache.clear();
        actions
    }

    fn enqueue_changed(&mut self, id: AlarmId) {
        if self.changed_set.insert(id.clone()) {
            self.changed_queue.push_back(id);
        }
    }

    fn cache_get(&mut self, id: &AlarmId, reader: &dyn StoreReader) -> ResolvedInput {
        if let Some(v) = self.cache.get(id) {
            return v.clone();
        }
        let v = reader.read(id);
        self.cache.insert(id.clone(), v.clone());
        v
    }

    fn cache_put(
        &mut self,
        id: &AlarmId,
        new_state: AlarmState,
        new_description: Option<String>,
        reader: &dyn StoreReader,
    ) {
        let current = self.cache_get(id, reader);
        let stored_description = if new_state == AlarmState::Set { new_description } else { None };
        let state_changed = current.0 != new_state;
        let description_changed = new_state == AlarmState::Set && current.1 != stored_description;
        if !state_changed && !description_changed {
            return;
        }

        self.cache.insert(id.clone(), (new_state, stored_description.clone()));
        if state_changed {
            self.enqueue_changed(id.clone());
        }

        let level = self.level_for(id);
        match new_state {
            AlarmState::Set => {
                debug!(id = %id, ?level, "alarm set");
                self.push_action(Action::Set { id: id.clone(), description: stored_description, level });
            }
            AlarmState::Clear => {
                debug!(id = %id, "alarm clear");
                self.push_action(Action::Clear { id: id.clone(), level });
            }
            AlarmState::Unknown => {
                // `Unknown` is only ever reached via `remove_managed_alarm`'s
                // `Forget`, which pushes its own action directly.
            }
        }
    }

    fn drain(&mut self, now: Timestamp, reader: &dyn StoreReader) {
        while let Some(id) = self.changed_queue.pop_front() {
            self.changed_set.remove(&id);
            let Some(subscribers) = self.rules_by_input.get(&id).cloned() else {
                continue;
            };
            for (managed_id, rule) in subscribers {
                if !self.conditions.contains_key(&managed_id) {
                    continue;
                }
                let inputs: Vec<ResolvedInput> =
                    rule.args.iter().map(|a| self.cache_get(a, reader)).collect();
                let current = self.cache_get(&rule.dest, reader);
                let rule_state = self.per_rule_state.entry(rule.dest.clone()).or_default();
                let outcome = ops::eval_input_change(&rule.op, &inputs, &current, now, rule_state);
                self.cache_put(&rule.dest, outcome.new_state, outcome.new_description, reader);
                if let Some(ti) = outcome.timer {
                    self.apply_timer_instruction(&rule.dest, ti);
                }
            }
        }
    }

    fn apply_timer_instruction(&mut self, id: &AlarmId, instruction: TimerInstruction) {
        match instruction {
            TimerInstruction::Start { millis, intended_state } => {
                self.next_token += 1;
                let token = TimerToken(self.next_token);
                self.timers.insert(id.clone(), token);
                self.push_action(Action::StartTimer { id: id.clone(), millis, intended_state, token });
            }
            TimerInstruction::Cancel => {
                if self.timers.remove(id).is_some() {
                    self.push_action(Action::CancelTimer { id: id.clone() });
                }
            }
        }
    }

    fn push_action(&mut self, action: Action) {
        let key = action_key(&action);
        if let Some(&idx) = self.action_index.get(&key) {
            self.action_order[idx] = Some(action);
        } else {
            let idx = self.action_order.len();
            self.action_index.insert(key, idx);
            self.action_order.push(Some(action));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::compiler::compile;
    use crate::ast::Style;
    use std::cell::RefCell;

    #[derive(Default)]
    struct TestStore {
        records: RefCell<HashMap<AlarmId, (AlarmState, Option<String>)>>,
    }

    impl StoreReader for TestStore {
        fn read(&self, id: &AlarmId) -> (AlarmState, Option<String>) {
            self.records
                .borrow()
                .get(id)
                .cloned()
                .unwrap_or((AlarmState::Unknown, None))
        }
    }

    impl TestStore {
        fn apply(&self, actions: &[Action]) {
            let mut records = self.records.borrow_mut();
            for action in actions {
                match action {
                    Action::Set { id, description, .. } => {
                        records.insert(id.clone(), (AlarmState::Set, description.clone()));
                    }
                    Action::Clear { id, .. } => {
                        records.insert(id.clone(), (AlarmState::Clear, None));
                    }
                    Action::Forget { id } => {
                        records.insert(id.clone(), (AlarmState::Unknown, None));
                    }
                    _ => {}
                }
            }
        }

        fn state(&self, id: &AlarmId) -> AlarmState {
            self.read(id).0
        }
    }

    fn register(engine: &mut Engine, store: &TestStore, result: &AlarmId, expr: Expr, now: Timestamp) {
        let compiled = compile(result, &expr, Style::Atom, Level::default_leaf()).unwrap();
        engine.add_managed_alarm(result, compiled, now, store);
        store.apply(&engine.commit_side_effects(now, store));
    }

    #[test]
    fn debounce_absorbs_a_transient() {
        let mut engine = Engine::new();
        let store = TestStore::default();
        let derived = AlarmId::atom("derived");
        register(&mut engine, &store, &derived, Expr::debounce(Expr::id("A"), 100), 0);

        engine.set_alarm(&AlarmId::atom("A"), None, 0, &store);
        store.apply(&engine.commit_side_effects(0, &store));
        assert_eq!(store.state(&derived), AlarmState::Clear);

        engine.clear_alarm(&AlarmId::atom("A"), 50, &store);
        let actions = engine.commit_side_effects(50, &store);
        store.apply(&actions);
        assert_eq!(store.state(&derived), AlarmState::Clear);
        // the debounce timer must have been cancelled, not left pending.
        assert!(actions.iter().any(|a| matches!(a, Action::CancelTimer { .. })));
    }

    #[test]
    fn debounce_passes_a_sustained_input() {
        let mut engine = Engine::new();
        let store = TestStore::default();
        let derived = AlarmId::atom("derived");
        register(&mut engine, &store, &derived, Expr::debounce(Expr::id("A"), 100), 0);

        engine.set_alarm(&AlarmId::atom("A"), None, 0, &store);
        let actions = engine.commit_side_effects(0, &store);
        store.apply(&actions);
        let start = actions.iter().find_map(|a| match a {
            Action::StartTimer { millis, intended_state, token, .. } => Some((*millis, *intended_state, *token)),
            _ => None,
        });
        let (millis, intended_state, token) = start.expect("debounce must schedule a timer");
        assert_eq!(millis, 100);

        engine.handle_timeout(&derived, intended_state, token, 100, &store);
        store.apply(&engine.commit_side_effects(100, &store));
        assert_eq!(store.state(&derived), AlarmState::Set);
    }

    #[test]
    fn hold_enforces_a_minimum_set_duration() {
        let mut engine = Engine::new();
        let store = TestStore::default();
        let derived = AlarmId::atom("derived");
        register(&mut engine, &store, &derived, Expr::hold(Expr::id("A"), 250), 0);

        engine.set_alarm(&AlarmId::atom("A"), None, 0, &store);
        let actions = engine.commit_side_effects(0, &store);
        store.apply(&actions);
        assert_eq!(store.state(&derived), AlarmState::Set);

        engine.clear_alarm(&AlarmId::atom("A"), 10, &store);
        store.apply(&engine.commit_side_effects(10, &store));
        // hold ignores the input's clear; it stays Set until its own timer.
        assert_eq!(store.state(&derived), AlarmState::Set);

        let (millis, intended_state, token) = actions
            .iter()
            .find_map(|a| match a {
                Action::StartTimer { millis, intended_state, token, .. } => {
                    Some((*millis, *intended_state, *token))
                }
                _ => None,
            })
            .expect("hold must schedule a clearing timer");
        assert_eq!(millis, 250);

        engine.handle_timeout(&derived, intended_state, token, 250, &store);
        store.apply(&engine.commit_side_effects(250, &store));
        assert_eq!(store.state(&derived), AlarmState::Clear);
    }

    #[test]
    fn compound_expression_tracks_its_inputs() {
        // (A and B) or not (B and C)
        let mut engine = Engine::new();
        let store = TestStore::default();
        let derived = AlarmId::atom("derived");
        let expr = Expr::or(vec![
            Expr::and(vec![Expr::id("A"), Expr::id("B")]),
            Expr::not(Expr::and(vec![Expr::id("B"), Expr::id("C")])),
        ]);
        register(&mut engine, &store, &derived, expr, 0);
        // all Clear initially: not(B and C) = not(Clear) = Set.
        assert_eq!(store.state(&derived), AlarmState::Set);

        engine.set_alarm(&AlarmId::atom("B"), None, 0, &store);
        store.apply(&engine.commit_side_effects(0, &store));
        engine.set_alarm(&AlarmId::atom("C"), None, 0, &store);
        store.apply(&engine.commit_side_effects(0, &store));
        // B and C now Set, so not(...) is Clear; A and B is still Clear (A unset).
        assert_eq!(store.state(&derived), AlarmState::Clear);
    }

    #[test]
    fn unknown_as_set_starts_set_until_the_input_clears() {
        let mut engine = Engine::new();
        let store = TestStore::default();
        let derived = AlarmId::atom("derived");
        register(&mut engine, &store, &derived, Expr::unknown_as_set(Expr::id("X")), 0);
        assert_eq!(store.state(&derived), AlarmState::Set);

        engine.clear_alarm(&AlarmId::atom("X"), 1, &store);
        store.apply(&engine.commit_side_effects(1, &store));
        assert_eq!(store.state(&derived), AlarmState::Clear);
    }

    #[test]
    fn removing_a_set_managed_alarm_emits_clear_then_forget() {
        let mut engine = Engine::new();
        let store = TestStore::default();
        let derived = AlarmId::atom("derived");
        register(&mut engine, &store, &derived, Expr::id("A"), 0);
        engine.set_alarm(&AlarmId::atom("A"), None, 0, &store);
        store.apply(&engine.commit_side_effects(0, &store));
        assert_eq!(store.state(&derived), AlarmState::Set);

        engine.remove_managed_alarm(&derived, 1, &store);
        let actions = engine.commit_side_effects(1, &store);
        store.apply(&actions);
        assert!(actions.iter().any(|a| matches!(a, Action::Clear { .. })));
        assert!(actions.iter().any(|a| matches!(a, Action::Forget { .. })));
        assert_eq!(store.state(&derived), AlarmState::Unknown);
    }

    #[test]
    fn redundant_set_with_identical_description_is_not_reemitted() {
        let mut engine = Engine::new();
        let store = TestStore::default();
        let a = AlarmId::atom("A");
        engine.set_alarm(&a, Some("d".into()), 0, &store);
        let first = engine.commit_side_effects(0, &store);
        store.apply(&first);
        assert_eq!(first.len(), 1);

        engine.set_alarm(&a, Some("d".into()), 1, &store);
        let second = engine.commit_side_effects(1, &store);
        assert!(second.is_empty());
    }

    #[test]
    fn description_only_update_emits_without_enqueueing_dependents() {
        let mut engine = Engine::new();
        let store = TestStore::default();
        let a = AlarmId::atom("A");
        engine.set_alarm(&a, Some("d1".into()), 0, &store);
        store.apply(&engine.commit_side_effects(0, &store));

        engine.set_alarm(&a, Some("d2".into()), 1, &store);
        let actions = engine.commit_side_effects(1, &store);
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], Action::Set { description: Some(d), .. } if d == "d2"));
    }
}
