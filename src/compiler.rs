//! Lowers an [`Expr`] AST into a [`CompiledCondition`] the Engine can
//! register — SPEC_FULL.md §4.2.

use crate::ast::{Expr, IdElem, IdRef, Style};
use crate::error::{FaultlineError, FaultlineResult};
use crate::id::{AlarmId, Atom};
use crate::level::Level;
use crate::ops::{Op, Rule};

/// The output of compilation: a set of three-address rules, the temporaries
/// they introduced, and the style/parameter metadata needed to interpret
/// parameterised id references (SPEC_FULL.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledCondition {
    pub rules: Vec<Rule>,
    pub temporaries: Vec<AlarmId>,
    pub style: Style,
    pub level: Level,
}

struct Builder<'a> {
    result_id: &'a AlarmId,
    style: &'a Style,
    rules: Vec<Rule>,
    temporaries: Vec<AlarmId>,
    counter: usize,
}

impl<'a> Builder<'a> {
    fn fresh_temp(&mut self) -> AlarmId {
        let id = AlarmId::temporary(self.result_id, self.counter);
        self.counter += 1;
        self.temporaries.push(id.clone());
        id
    }

    /// Build `expr`, returning the `AlarmId` that carries its value — either
    /// an existing input id (no rule emitted) or a freshly minted temporary.
    fn build(&mut self, expr: &Expr) -> FaultlineResult<AlarmId> {
        match expr {
            Expr::Id(id_ref) => resolve_id_ref(self.result_id, self.style, id_ref),
            _ => {
                let dest = self.fresh_temp();
                self.build_at(expr, dest.clone())?;
                Ok(dest)
            }
        }
    }

    /// Build `expr` directly into `dest`, used for the top-level expression
    /// (whose rule targets the managed alarm's own id) and for variadic
    /// operand lists.
    fn build_at(&mut self, expr: &Expr, dest: AlarmId) -> FaultlineResult<()> {
        match expr {
            Expr::Id(_) => unreachable!("bare id references never reach build_at"),
            Expr::Not(inner) => {
                let a = self.build(inner)?;
                self.rules.push(Rule { op: Op::Not, dest, args: vec![a] });
            }
            Expr::UnknownAsSet(inner) => {
                let a = self.build(inner)?;
                self.rules.push(Rule { op: Op::UnknownAsSet, dest, args: vec![a] });
            }
            Expr::Debounce(inner, millis) => {
                let a = self.build(inner)?;
                self.rules.push(Rule { op: Op::Debounce { millis: *millis }, dest, args: vec![a] });
            }
            Expr::Hold(inner, millis) => {
                let a = self.build(inner)?;
                self.rules.push(Rule { op: Op::Hold { millis: *millis }, dest, args: vec![a] });
            }
            Expr::Intensity(inner, count, period_ms) => {
                let a = self.build(inner)?;
                self.rules.push(Rule {
                    op: Op::Intensity { count: *count, period_ms: *period_ms },
                    dest,
                    args: vec![a],
                });
            }
            Expr::OnTime(inner, on_ms, period_ms) => {
                let a = self.build(inner)?;
                self.rules.push(Rule {
                    op: Op::OnTime { on_ms: *on_ms, period_ms: *period_ms },
                    dest,
                    args: vec![a],
                });
            }
            Expr::SustainWindow(inner, on_ms, period_ms) => {
                let a = self.build(inner)?;
                self.rules.push(Rule {
                    op: Op::SustainWindow { on_ms: *on_ms, period_ms: *period_ms },
                    dest,
                    args: vec![a],
                });
            }
            Expr::And(exprs) => {
                let args = self.build_operands(exprs)?;
                self.rules.push(Rule { op: Op::And, dest, args });
            }
            Expr::Or(exprs) => {
                let args = self.build_operands(exprs)?;
                self.rules.push(Rule { op: Op::Or, dest, args });
            }
        }
        Ok(())
    }

    fn build_operands(&mut self, exprs: &[Expr]) -> FaultlineResult<Vec<AlarmId>> {
        if exprs.is_empty() {
            return Err(FaultlineError::Compile("and/or require at least one operand".into()));
        }
        exprs.iter().map(|e| self.build(e)).collect()
    }
}

fn resolve_id_ref(result_id: &AlarmId, style: &Style, id_ref: &IdRef) -> FaultlineResult<AlarmId> {
    match id_ref {
        IdRef::Atom(name) => Ok(AlarmId::atom(name.clone())),
        IdRef::Tuple(tag, elems) => {
            let mut params = Vec::with_capacity(elems.len());
            for elem in elems {
                match elem {
                    IdElem::Fixed(a) => params.push(a.clone()),
                    IdElem::Param(name) => params.push(resolve_param(result_id, style, name)?),
                }
            }
            Ok(AlarmId::tuple(tag.clone(), params))
        }
    }
}

fn resolve_param(result_id: &AlarmId, style: &Style, name: &str) -> FaultlineResult<Atom> {
    let Style::TaggedTuple { parameters } = style else {
        return Err(FaultlineError::Compile(format!(
            "parameter `{name}` referenced but style is not tagged_tuple"
        )));
    };
    let idx = parameters
        .iter()
        .position(|p| p == name)
        .ok_or_else(|| FaultlineError::Compile(format!("undeclared parameter `{name}`")))?;
    match result_id {
        AlarmId::Tuple(elems) if elems.len() == parameters.len() + 1 => Ok(elems[idx + 1].clone()),
        _ => Err(FaultlineError::Compile(
            "managed alarm id shape does not match its declared parameters".into(),
        )),
    }
}

/// Compile `expr` into rules whose top-level destination is `result_id`.
pub fn compile(
    result_id: &AlarmId,
    expr: &Expr,
    style: Style,
    level: Level,
) -> FaultlineResult<CompiledCondition> {
    let mut builder = Builder {
        result_id,
        style: &style,
        rules: Vec::new(),
        temporaries: Vec::new(),
        counter: 0,
    };

    match expr {
        Expr::Id(id_ref) => {
            let referenced = resolve_id_ref(result_id, &style, id_ref)?;
            builder.rules.push(Rule { op: Op::Copy, dest: result_id.clone(), args: vec![referenced] });
        }
        other => builder.build_at(other, result_id.clone())?,
    }

    Ok(CompiledCondition {
        rules: builder.rules,
        temporaries: builder.temporaries,
        style,
        level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_id_top_level_emits_a_single_copy_rule() {
        let result = AlarmId::atom("derived");
        let compiled = compile(&result, &Expr::id("A"), Style::Atom, Level::default_leaf()).unwrap();
        assert_eq!(compiled.rules.len(), 1);
        assert_eq!(compiled.rules[0].op, Op::Copy);
        assert_eq!(compiled.rules[0].dest, result);
        assert!(compiled.temporaries.is_empty());
    }

    #[test]
    fn compound_expression_compiles_to_a_dag_rooted_at_result_id() {
        // (A and B) or not (B and C)
        let result = AlarmId::atom("derived");
        let expr = Expr::or(vec![
            Expr::and(vec![Expr::id("A"), Expr::id("B")]),
            Expr::not(Expr::and(vec![Expr::id("B"), Expr::id("C")])),
        ]);
        let compiled = compile(&result, &expr, Style::Atom, Level::default_leaf()).unwrap();
        assert_eq!(compiled.rules.last().unwrap().dest, result);
        assert_eq!(compiled.rules.last().unwrap().op, Op::Or);
        assert_eq!(compiled.temporaries.len(), 3); // A and B, B and C, not(B and C)
    }

    #[test]
    fn tagged_tuple_parameter_resolves_from_the_managed_id() {
        let result = AlarmId::tuple("well_control", vec![Atom::from("rig-1")]);
        let style = Style::TaggedTuple { parameters: vec!["rig".to_string()] };
        let expr = Expr::tuple("flow_status", vec![IdElem::Param("rig".to_string())]);
        let compiled = compile(&result, &expr, style, Level::default_leaf()).unwrap();
        let rule = &compiled.rules[0];
        assert_eq!(rule.args[0], AlarmId::tuple("flow_status", vec![Atom::from("rig-1")]));
    }

    #[test]
    fn undeclared_parameter_is_a_compile_error() {
        let result = AlarmId::atom("derived");
        let expr = Expr::tuple("x", vec![IdElem::Param("missing".to_string())]);
        let err = compile(&result, &expr, Style::Atom, Level::default_leaf()).unwrap_err();
        assert!(matches!(err, FaultlineError::Compile(_)));
    }
}
