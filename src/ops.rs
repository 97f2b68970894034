//! Primitive rule operators (SPEC_FULL.md §4.3.4) and the three-address
//! [`Rule`] shape the [`compiler`](crate::compiler) emits.

use serde::{Deserialize, Serialize};

use crate::id::AlarmId;
use crate::state::AlarmState;
use crate::timestamp::Timestamp;
use crate::window::{EventState, Window};

/// A rule argument: either a reference to another alarm's current value, or a
/// literal baked in at compile time. This is the shape the wire format
/// (SPEC_FULL.md §6, [`crate::wire`]) uses for rule operands; the in-memory
/// [`Rule`] instead carries literals on the [`Op`] variant — see
/// [`crate::wire`] for the conversion between the two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Arg {
    Id(AlarmId),
    Int(i64),
}

/// The operator a [`Rule`] applies. Timing parameters are carried on the
/// variant rather than as `Arg::Int`s so `eval_input_change` never has to
/// parse them back out of an argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Copy,
    Not,
    And,
    Or,
    UnknownAsSet,
    Debounce { millis: u64 },
    Hold { millis: u64 },
    Intensity { count: u32, period_ms: u64 },
    OnTime { on_ms: u64, period_ms: u64 },
    SustainWindow { on_ms: u64, period_ms: u64 },
}

/// Three-address form: `(op, dest, args)`. `args` holds only the `AlarmId`
/// operands — `Op`'s own fields carry any literal timing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub op: Op,
    pub dest: AlarmId,
    pub args: Vec<AlarmId>,
}

/// Per-destination auxiliary state for stateful operators (SPEC_FULL.md §9:
/// "per-rule state polymorphism").
#[derive(Debug, Clone, Default)]
pub enum RuleState {
    #[default]
    None,
    Window(Window),
}

impl RuleState {
    fn window_mut(&mut self) -> &mut Window {
        if !matches!(self, RuleState::Window(_)) {
            *self = RuleState::Window(Window::new());
        }
        match self {
            RuleState::Window(w) => w,
            RuleState::None => unreachable!(),
        }
    }
}

/// What a timer action should do when a rule's evaluation schedules one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerInstruction {
    Start { millis: u64, intended_state: AlarmState },
    Cancel,
}

/// The result of evaluating a rule against its (possibly changed) inputs.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub new_state: AlarmState,
    pub new_description: Option<String>,
    pub timer: Option<TimerInstruction>,
}

/// Resolved `(state, description)` for one rule input, in `Rule::args` order.
pub type ResolvedInput = (AlarmState, Option<String>);

/// Evaluate `rule.op` given its resolved inputs and current output, following
/// the operator semantics of SPEC_FULL.md §4.3.4. Called whenever one of the
/// rule's inputs changed in the current evaluation pass.
pub fn eval_input_change(
    op: &Op,
    inputs: &[ResolvedInput],
    current: &ResolvedInput,
    now: Timestamp,
    rule_state: &mut RuleState,
) -> EvalOutcome {
    match op {
        Op::Copy => {
            let (state, desc) = &inputs[0];
            EvalOutcome { new_state: *state, new_description: desc.clone(), timer: None }
        }
        Op::Not => {
            let set = !inputs[0].0.is_set();
            EvalOutcome { new_state: AlarmState::from_set(set), new_description: None, timer: None }
        }
        Op::And => {
            let set = inputs.iter().all(|(s, _)| s.is_set());
            EvalOutcome { new_state: AlarmState::from_set(set), new_description: None, timer: None }
        }
        Op::Or => {
            let set = inputs.iter().any(|(s, _)| s.is_set());
            EvalOutcome { new_state: AlarmState::from_set(set), new_description: None, timer: None }
        }
        Op::UnknownAsSet => {
            let (state, desc) = &inputs[0];
            let set = matches!(state, AlarmState::Set | AlarmState::Unknown);
            let desc = if *state == AlarmState::Set { desc.clone() } else { None };
            EvalOutcome { new_state: AlarmState::from_set(set), new_description: desc, timer: None }
        }
        Op::Debounce { millis } => {
            let (state, desc) = &inputs[0];
            if state.is_set() {
                EvalOutcome {
                    new_state: AlarmState::Clear,
                    new_description: None,
                    timer: Some(TimerInstruction::Start { millis: *millis, intended_state: AlarmState::Set }),
                }
            } else {
                let _ = desc;
                EvalOutcome {
                    new_state: AlarmState::Clear,
                    new_description: None,
                    timer: Some(TimerInstruction::Cancel),
                }
            }
        }
        Op::Hold { millis } => {
            let (state, desc) = &inputs[0];
            if state.is_set() {
                EvalOutcome {
                    new_state: AlarmState::Set,
                    new_description: desc.clone(),
                    timer: Some(TimerInstruction::Start { millis: *millis, intended_state: AlarmState::Clear }),
                }
            } else {
                EvalOutcome {
                    new_state: current.0,
                    new_description: current.1.clone(),
                    timer: None,
                }
            }
        }
        Op::Intensity { count, period_ms } => {
            let window = rule_state.window_mut();
            window.add_event(event_state(inputs[0].0), now, *period_ms);
            let r = window.frequency(now, *period_ms, *count);
            window_outcome(r)
        }
        Op::OnTime { on_ms, period_ms } => {
            let window = rule_state.window_mut();
            window.add_event(event_state(inputs[0].0), now, *period_ms);
            let r = window.cumulative(now, *period_ms, *on_ms);
            window_outcome(r)
        }
        Op::SustainWindow { on_ms, period_ms } => {
            let window = rule_state.window_mut();
            window.add_event(event_state(inputs[0].0), now, *period_ms);
            let r = window.single_duration(now, *period_ms, *on_ms);
            window_outcome(r)
        }
    }
}

fn event_state(state: AlarmState) -> EventState {
    if state.is_set() {
        EventState::Set
    } else {
        EventState::Clear
    }
}

fn window_outcome(r: crate::window::FlipResult) -> EvalOutcome {
    let new_state = AlarmState::from_set(r.set);
    let timer = match r.next_flip_ms {
        Some(ms) => Some(TimerInstruction::Start {
            millis: ms.max(0) as u64,
            intended_state: AlarmState::from_set(!r.set),
        }),
        None => Some(TimerInstruction::Cancel),
    };
    EvalOutcome { new_state, new_description: None, timer }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(set: bool) -> ResolvedInput {
        (AlarmState::from_set(set), None)
    }

    #[test]
    fn and_requires_all_inputs_set() {
        let mut state = RuleState::None;
        let out = eval_input_change(&Op::And, &[input(true), input(false)], &input(false), 0, &mut state);
        assert_eq!(out.new_state, AlarmState::Clear);
        let out = eval_input_change(&Op::And, &[input(true), input(true)], &input(false), 0, &mut state);
        assert_eq!(out.new_state, AlarmState::Set);
    }

    #[test]
    fn hold_ignores_clear_and_keeps_current_output() {
        let mut state = RuleState::None;
        let current = (AlarmState::Set, Some("prior".to_string()));
        let out = eval_input_change(&Op::Hold { millis: 250 }, &[input(false)], &current, 10, &mut state);
        assert_eq!(out.new_state, AlarmState::Set);
        assert_eq!(out.timer, None);
    }

    #[test]
    fn debounce_starts_timer_on_set_and_stays_clear() {
        let mut state = RuleState::None;
        let out = eval_input_change(&Op::Debounce { millis: 100 }, &[input(true)], &input(false), 0, &mut state);
        assert_eq!(out.new_state, AlarmState::Clear);
        assert_eq!(
            out.timer,
            Some(TimerInstruction::Start { millis: 100, intended_state: AlarmState::Set })
        );
    }

    #[test]
    fn unknown_as_set_treats_unknown_as_set() {
        let mut state = RuleState::None;
        let out = eval_input_change(
            &Op::UnknownAsSet,
            &[(AlarmState::Unknown, None)],
            &input(false),
            0,
            &mut state,
        );
        assert_eq!(out.new_state, AlarmState::Set);
    }
}
