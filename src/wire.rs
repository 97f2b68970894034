//! The compiled-condition wire format exchanged with the DSL frontend
//! (SPEC_FULL.md §6): `{rules: [(OpName, DestId, [Arg])], temporaries: [AlarmId],
//! options: {style, parameters}}`. The frontend itself — whatever parses a
//! domain DSL into this shape — is out of scope for this crate; this module
//! is the boundary that turns that shape into a [`CompiledCondition`] the
//! Engine can register, and back.
//!
//! Unlike the in-memory [`Rule`], which carries timing parameters on the
//! [`Op`] variant itself, the wire format carries them as trailing
//! [`Arg::Int`] literals in the argument list — this is what SPEC_FULL.md §9
//! means by "operator arguments are uniformly `[AlarmId|Literal]`". Moving
//! between the two shapes is this module's entire job.

use serde::{Deserialize, Serialize};

use crate::ast::Style;
use crate::compiler::CompiledCondition;
use crate::error::{FaultlineError, FaultlineResult};
use crate::id::AlarmId;
use crate::level::Level;
use crate::ops::{Arg, Op, Rule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum OpName {
    Copy,
    Not,
    And,
    Or,
    UnknownAsSet,
    Debounce,
    Hold,
    Intensity,
    OnTime,
    SustainWindow,
}

/// One `(OpName, DestId, [Arg])` triple, exactly as SPEC_FULL.md §6 shapes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireRule(OpName, AlarmId, Vec<Arg>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireStyle {
    Atom,
    TaggedTuple,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireOptions {
    style: WireStyle,
    #[serde(default)]
    parameters: Vec<String>,
}

/// The wire-level shape of a [`CompiledCondition`]. `level` is not part of
/// the wire format (SPEC_FULL.md §6) — it's supplied by the caller of
/// [`from_wire`] from config or a registration-time default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireCondition {
    rules: Vec<WireRule>,
    temporaries: Vec<AlarmId>,
    options: WireOptions,
}

/// Parse a [`WireCondition`] from its JSON wire representation.
pub fn parse(json: &str) -> FaultlineResult<WireCondition> {
    serde_json::from_str(json).map_err(|e| FaultlineError::Compile(format!("malformed wire condition: {e}")))
}

/// Render a [`CompiledCondition`] back to its JSON wire representation.
pub fn render(result_id: &AlarmId, condition: &CompiledCondition) -> FaultlineResult<String> {
    let wire = to_wire(result_id, condition)?;
    serde_json::to_string(&wire).map_err(|e| FaultlineError::Compile(format!("failed to render wire condition: {e}")))
}

/// Convert a [`WireCondition`] into a [`CompiledCondition`], assigning it
/// `level` (the wire format carries no level of its own).
pub fn from_wire(wire: &WireCondition, level: Level) -> FaultlineResult<CompiledCondition> {
    let style = match wire.options.style {
        WireStyle::Atom => Style::Atom,
        WireStyle::TaggedTuple => Style::TaggedTuple { parameters: wire.options.parameters.clone() },
    };
    let rules = wire.rules.iter().map(wire_rule_to_rule).collect::<FaultlineResult<Vec<_>>>()?;
    Ok(CompiledCondition { rules, temporaries: wire.temporaries.clone(), style, level })
}

fn to_wire(result_id: &AlarmId, condition: &CompiledCondition) -> FaultlineResult<WireCondition> {
    let (style, parameters) = match &condition.style {
        Style::Atom => (WireStyle::Atom, Vec::new()),
        Style::TaggedTuple { parameters } => (WireStyle::TaggedTuple, parameters.clone()),
    };
    let rules = condition.rules.iter().map(rule_to_wire_rule).collect::<FaultlineResult<Vec<_>>>()?;
    let _ = result_id; // the managed id itself is carried by the caller, not the wire shape.
    Ok(WireCondition { rules, temporaries: condition.temporaries.clone(), options: WireOptions { style, parameters } })
}

fn only_input(args: &[Arg]) -> FaultlineResult<AlarmId> {
    match args {
        [Arg::Id(id)] => Ok(id.clone()),
        _ => Err(FaultlineError::Compile("expected exactly one AlarmId argument".into())),
    }
}

fn int_arg(args: &[Arg], idx: usize) -> FaultlineResult<i64> {
    match args.get(idx) {
        Some(Arg::Int(n)) => Ok(*n),
        _ => Err(FaultlineError::Compile(format!("expected an integer literal at argument {idx}"))),
    }
}

fn ids_only(args: &[Arg]) -> FaultlineResult<Vec<AlarmId>> {
    args.iter()
        .map(|a| match a {
            Arg::Id(id) => Ok(id.clone()),
            Arg::Int(_) => Err(FaultlineError::Compile("and/or take only AlarmId arguments".into())),
        })
        .collect()
}

fn wire_rule_to_rule(wire: &WireRule) -> FaultlineResult<Rule> {
    let WireRule(op_name, dest, args) = wire;
    let (op, rule_args) = match op_name {
        OpName::Copy => (Op::Copy, vec![only_input(args)?]),
        OpName::Not => (Op::Not, vec![only_input(args)?]),
        OpName::UnknownAsSet => (Op::UnknownAsSet, vec![only_input(args)?]),
        OpName::And => (Op::And, ids_only(args)?),
        OpName::Or => (Op::Or, ids_only(args)?),
        OpName::Debounce => {
            let input = input_id(args)?;
            let millis = int_arg(args, 1)? as u64;
            (Op::Debounce { millis }, vec![input])
        }
        OpName::Hold => {
            let input = input_id(args)?;
            let millis = int_arg(args, 1)? as u64;
            (Op::Hold { millis }, vec![input])
        }
        OpName::Intensity => {
            let input = input_id(args)?;
            let count = int_arg(args, 1)? as u32;
            let period_ms = int_arg(args, 2)? as u64;
            (Op::Intensity { count, period_ms }, vec![input])
        }
        OpName::OnTime => {
            let input = input_id(args)?;
            let on_ms = int_arg(args, 1)? as u64;
            let period_ms = int_arg(args, 2)? as u64;
            (Op::OnTime { on_ms, period_ms }, vec![input])
        }
        OpName::SustainWindow => {
            let input = input_id(args)?;
            let on_ms = int_arg(args, 1)? as u64;
            let period_ms = int_arg(args, 2)? as u64;
            (Op::SustainWindow { on_ms, period_ms }, vec![input])
        }
    };
    Ok(Rule { op, dest: dest.clone(), args: rule_args })
}

fn input_id(args: &[Arg]) -> FaultlineResult<AlarmId> {
    match args.first() {
        Some(Arg::Id(id)) => Ok(id.clone()),
        _ => Err(FaultlineError::Compile("expected an AlarmId as the first argument".into())),
    }
}

fn rule_to_wire_rule(rule: &Rule) -> FaultlineResult<WireRule> {
    let (op_name, args) = match &rule.op {
        Op::Copy => (OpName::Copy, vec![Arg::Id(single(&rule.args)?)]),
        Op::Not => (OpName::Not, vec![Arg::Id(single(&rule.args)?)]),
        Op::UnknownAsSet => (OpName::UnknownAsSet, vec![Arg::Id(single(&rule.args)?)]),
        Op::And => (OpName::And, rule.args.iter().cloned().map(Arg::Id).collect()),
        Op::Or => (OpName::Or, rule.args.iter().cloned().map(Arg::Id).collect()),
        Op::Debounce { millis } => (OpName::Debounce, vec![Arg::Id(single(&rule.args)?), Arg::Int(*millis as i64)]),
        Op::Hold { millis } => (OpName::Hold, vec![Arg::Id(single(&rule.args)?), Arg::Int(*millis as i64)]),
        Op::Intensity { count, period_ms } => (
            OpName::Intensity,
            vec![Arg::Id(single(&rule.args)?), Arg::Int(*count as i64), Arg::Int(*period_ms as i64)],
        ),
        Op::OnTime { on_ms, period_ms } => (
            OpName::OnTime,
            vec![Arg::Id(single(&rule.args)?), Arg::Int(*on_ms as i64), Arg::Int(*period_ms as i64)],
        ),
        Op::SustainWindow { on_ms, period_ms } => (
            OpName::SustainWindow,
            vec![Arg::Id(single(&rule.args)?), Arg::Int(*on_ms as i64), Arg::Int(*period_ms as i64)],
        ),
    };
    Ok(WireRule(op_name, rule.dest.clone(), args))
}

fn single(args: &[AlarmId]) -> FaultlineResult<AlarmId> {
    args.first().cloned().ok_or_else(|| FaultlineError::Compile("rule has no arguments".into()))
}
