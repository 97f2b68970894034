use crate::id::{AlarmId, Atom};

/// An element of a [`Pattern`] tuple: either a concrete atom to match exactly,
/// or the wildcard, matching any single element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternElem {
    Exact(Atom),
    Wildcard,
}

/// A subscription pattern (SPEC_FULL.md §4.1). Mirrors [`AlarmId`]'s shape —
/// atom or tuple — but any element (or the whole pattern) may be the
/// wildcard `_`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Matches any id at all.
    Any,
    /// Matches only the exact atom.
    Atom(String),
    /// Matches only tuples of identical arity whose elements each satisfy the
    /// corresponding [`PatternElem`].
    Tuple(Vec<PatternElem>),
}

impl Pattern {
    pub fn any() -> Self {
        Pattern::Any
    }

    pub fn atom(name: impl Into<String>) -> Self {
        Pattern::Atom(name.into())
    }

    pub fn tuple(elems: Vec<PatternElem>) -> Self {
        Pattern::Tuple(elems)
    }
}

/// Evaluate whether `id` matches `pattern`. Tuples only match tuples of the
/// same arity; atoms only match equal atoms; `_` matches anything at the
/// position (or position range, for [`Pattern::Any`]) it appears.
pub fn matches(pattern: &Pattern, id: &AlarmId) -> bool {
    match pattern {
        Pattern::Any => true,
        Pattern::Atom(name) => matches!(id, AlarmId::Atom(s) if s == name),
        Pattern::Tuple(elems) => match id {
            AlarmId::Tuple(id_elems) => {
                elems.len() == id_elems.len()
                    && elems.iter().zip(id_elems.iter()).all(|(pat, val)| match pat {
                        PatternElem::Wildcard => true,
                        PatternElem::Exact(a) => a == val,
                    })
            }
            AlarmId::Atom(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_pattern_matches_everything() {
        assert!(matches(&Pattern::any(), &AlarmId::atom("anything")));
        assert!(matches(
            &Pattern::any(),
            &AlarmId::tuple("well_control", vec![Atom::from("rig-1")])
        ));
    }

    #[test]
    fn atom_pattern_matches_only_equal_atom() {
        let pat = Pattern::atom("flow_imbalance");
        assert!(matches(&pat, &AlarmId::atom("flow_imbalance")));
        assert!(!matches(&pat, &AlarmId::atom("other")));
        assert!(!matches(
            &pat,
            &AlarmId::tuple("flow_imbalance", vec![Atom::from(1i64)])
        ));
    }

    #[test]
    fn tuple_pattern_requires_matching_arity() {
        let pat = Pattern::tuple(vec![
            PatternElem::Exact(Atom::from("well_control")),
            PatternElem::Wildcard,
        ]);
        assert!(matches(
            &pat,
            &AlarmId::tuple("well_control", vec![Atom::from("rig-1")])
        ));
        assert!(!matches(
            &pat,
            &AlarmId::tuple("well_control", vec![Atom::from("rig-1"), Atom::from(2i64)])
        ));
        assert!(!matches(
            &pat,
            &AlarmId::tuple("other", vec![Atom::from("rig-1")])
        ));
    }

    #[test]
    fn wildcard_element_matches_any_single_position() {
        let pat = Pattern::tuple(vec![PatternElem::Wildcard, PatternElem::Exact(Atom::Int(3))]);
        assert!(matches(
            &pat,
            &AlarmId::tuple("anything", vec![Atom::Int(3)])
        ));
        assert!(!matches(
            &pat,
            &AlarmId::tuple("anything", vec![Atom::Int(4)])
        ));
    }
}
