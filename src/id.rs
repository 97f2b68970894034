use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// A single parameter inside a tagged-tuple `AlarmId` or rule argument list.
///
/// Mirrors the three literal shapes the compiled-condition wire format allows
/// (SPEC_FULL.md §6): strings, integers, and bare atoms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Atom {
    Symbol(String),
    Str(String),
    Int(i64),
}

impl Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Symbol(s) => write!(f, "{s}"),
            Atom::Str(s) => write!(f, "{s:?}"),
            Atom::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Atom {
    fn from(s: &str) -> Self {
        Atom::Symbol(s.to_string())
    }
}

impl From<i64> for Atom {
    fn from(i: i64) -> Self {
        Atom::Int(i)
    }
}

/// Identifies a single alarm. Either a bare atom-like symbol, or an ordered
/// tuple whose first element is a tag and whose remaining elements are
/// parameters (SPEC_FULL.md §3).
///
/// `AlarmId`s compare structurally, which is what lets them serve as map keys
/// throughout the Engine and Store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlarmId {
    Atom(String),
    Tuple(Vec<Atom>),
}

impl AlarmId {
    pub fn atom(name: impl Into<String>) -> Self {
        AlarmId::Atom(name.into())
    }

    pub fn tuple(tag: impl Into<String>, params: Vec<Atom>) -> Self {
        let mut elems = Vec::with_capacity(params.len() + 1);
        elems.push(Atom::Symbol(tag.into()));
        elems.extend(params);
        AlarmId::Tuple(elems)
    }

    /// The leading tag: the whole id for an atom, or the first tuple element.
    pub fn tag(&self) -> &str {
        match self {
            AlarmId::Atom(s) => s,
            AlarmId::Tuple(elems) => match elems.first() {
                Some(Atom::Symbol(s)) => s,
                _ => "",
            },
        }
    }

    /// Mint a fresh temporary id owned by `managed_id`, encoding both the
    /// owning managed alarm (for removal/reclaim — SPEC_FULL.md §4.2's
    /// uniqueness requirement) and a sequence number.
    pub fn temporary(managed_id: &AlarmId, seq: usize) -> AlarmId {
        AlarmId::Atom(format!("{managed_id}.{seq}"))
    }

    /// True if this id was minted by [`AlarmId::temporary`] for `managed_id`.
    pub fn is_temporary_of(&self, managed_id: &AlarmId) -> bool {
        match self {
            AlarmId::Atom(s) => s.starts_with(&format!("{managed_id}.")),
            AlarmId::Tuple(_) => false,
        }
    }
}

impl Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmId::Atom(s) => write!(f, "{s}"),
            AlarmId::Tuple(elems) => {
                write!(f, "{{")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for AlarmId {
    fn from(s: &str) -> Self {
        AlarmId::Atom(s.to_string())
    }
}

impl From<String> for AlarmId {
    fn from(s: String) -> Self {
        AlarmId::Atom(s)
    }
}
