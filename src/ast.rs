//! Expression AST accepted by the [`compiler`](crate::compiler) — SPEC_FULL.md
//! §4.2. This is the DSL frontend's output, not something the Engine ever
//! sees directly.

use crate::id::Atom;

/// One element of a parameterised tuple id reference: either a literal atom,
/// or the name of a declared parameter whose value is substituted from the
/// managed alarm's own id at compile time (`style = tagged_tuple`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdElem {
    Fixed(Atom),
    Param(String),
}

/// A reference to an `AlarmId`, possibly parameterised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdRef {
    Atom(String),
    Tuple(String, Vec<IdElem>),
}

/// The expression grammar from SPEC_FULL.md §4.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Id(IdRef),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Debounce(Box<Expr>, u64),
    Hold(Box<Expr>, u64),
    Intensity(Box<Expr>, u32, u64),
    OnTime(Box<Expr>, u64, u64),
    SustainWindow(Box<Expr>, u64, u64),
    UnknownAsSet(Box<Expr>),
}

impl Expr {
    pub fn id(name: impl Into<String>) -> Self {
        Expr::Id(IdRef::Atom(name.into()))
    }

    pub fn tuple(tag: impl Into<String>, elems: Vec<IdElem>) -> Self {
        Expr::Id(IdRef::Tuple(tag.into(), elems))
    }

    pub fn not(e: Expr) -> Self {
        Expr::Not(Box::new(e))
    }

    pub fn and(exprs: Vec<Expr>) -> Self {
        Expr::And(exprs)
    }

    pub fn or(exprs: Vec<Expr>) -> Self {
        Expr::Or(exprs)
    }

    pub fn debounce(e: Expr, millis: u64) -> Self {
        Expr::Debounce(Box::new(e), millis)
    }

    pub fn hold(e: Expr, millis: u64) -> Self {
        Expr::Hold(Box::new(e), millis)
    }

    pub fn intensity(e: Expr, count: u32, period_ms: u64) -> Self {
        Expr::Intensity(Box::new(e), count, period_ms)
    }

    pub fn on_time(e: Expr, on_ms: u64, period_ms: u64) -> Self {
        Expr::OnTime(Box::new(e), on_ms, period_ms)
    }

    pub fn sustain_window(e: Expr, on_ms: u64, period_ms: u64) -> Self {
        Expr::SustainWindow(Box::new(e), on_ms, period_ms)
    }

    pub fn unknown_as_set(e: Expr) -> Self {
        Expr::UnknownAsSet(Box::new(e))
    }
}

/// Declares whether a managed alarm id is a bare atom or a tagged tuple, and
/// (for the latter) the names its parameters are bound to — SPEC_FULL.md
/// §4.2, §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Style {
    Atom,
    TaggedTuple { parameters: Vec<String> },
}
