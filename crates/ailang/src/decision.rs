//! Decision-tree match dispatch.
//!
//! An optimization only: semantics come from the linear matcher in
//! [`crate::eval`]. Compilation groups arms by the head tag of their root
//! pattern; dispatch looks up the scrutinee's tag and hands back the
//! candidate arm indices *in original order*, so left-to-right priority
//! and guard fall-through behave exactly as in linear mode. Candidate
//! selection may over-approximate (the matcher re-checks every candidate)
//! but never excludes an arm that could match.

use crate::{
    ast::Lit,
    core::{CoreArm, CorePatternKind},
    value::Value,
};

/// Head tag a root pattern or scrutinee discriminates on.
#[derive(Debug, Clone, PartialEq)]
enum HeadTag {
    Ctor(String, String),
    Int(i64),
    /// Stored as bits for grouping; [`float_tag`] canonicalizes first so
    /// bucket identity agrees with the matcher's `==`.
    Float(u64),
    /// NaN patterns and scrutinees. NaN compares unequal to everything in
    /// the matcher, so arms in this bucket never capture — the bucket only
    /// keeps them from colliding with real float keys.
    FloatNan,
    Bool(bool),
    Str(String),
    Char(char),
    Unit,
    Tuple,
    List,
    Record,
}

/// Tags a float by the equality the linear matcher uses, not by raw bits:
/// `0.0` and `-0.0` compare equal (one shared bucket), NaN compares equal
/// to nothing (its own bucket, every payload).
fn float_tag(x: f64) -> HeadTag {
    if x.is_nan() {
        HeadTag::FloatNan
    } else if x == 0.0 {
        HeadTag::Float(0.0f64.to_bits())
    } else {
        HeadTag::Float(x.to_bits())
    }
}

fn tag_of_pattern(kind: &CorePatternKind) -> Option<HeadTag> {
    match kind {
        CorePatternKind::Wildcard | CorePatternKind::Var(_) => None,
        CorePatternKind::Lit(lit) => Some(match lit {
            Lit::Int(n) => HeadTag::Int(*n),
            Lit::Float(x) => float_tag(*x),
            Lit::Bool(b) => HeadTag::Bool(*b),
            Lit::Str(s) => HeadTag::Str(s.clone()),
            Lit::Char(c) => HeadTag::Char(*c),
            Lit::Unit => HeadTag::Unit,
        }),
        CorePatternKind::Ctor { type_name, ctor, .. } => Some(HeadTag::Ctor(type_name.clone(), ctor.clone())),
        CorePatternKind::Tuple(_) => Some(HeadTag::Tuple),
        CorePatternKind::List { .. } => Some(HeadTag::List),
        CorePatternKind::Record(_) => Some(HeadTag::Record),
    }
}

fn tag_of_value(value: &Value) -> Option<HeadTag> {
    Some(match value {
        Value::Int(n) => HeadTag::Int(*n),
        Value::Float(x) => float_tag(*x),
        Value::Bool(b) => HeadTag::Bool(*b),
        Value::Str(s) => HeadTag::Str(s.to_string()),
        Value::Char(c) => HeadTag::Char(*c),
        Value::Unit => HeadTag::Unit,
        Value::Tuple(_) => HeadTag::Tuple,
        Value::List(_) => HeadTag::List,
        Value::Record(_) => HeadTag::Record,
        Value::Tagged(tagged) => HeadTag::Ctor(tagged.type_name.clone(), tagged.ctor.clone()),
        Value::Indirect(cell) => return cell.borrow().force().ok().and_then(|v| tag_of_value(&v)),
        Value::Function(_) | Value::Builtin(_) => return None,
    })
}

/// Compiled dispatch table for one `match`.
#[derive(Debug)]
pub struct DecisionTree {
    /// Per-tag candidate arm lists, each preserving source order.
    cases: Vec<(HeadTag, Vec<usize>)>,
    /// Arms with irrefutable roots, reachable from any scrutinee tag.
    default_candidates: Vec<usize>,
}

impl DecisionTree {
    #[must_use]
    pub fn compile(arms: &[CoreArm]) -> Self {
        let mut cases: Vec<(HeadTag, Vec<usize>)> = Vec::new();
        let mut default_candidates: Vec<usize> = Vec::new();
        for (index, arm) in arms.iter().enumerate() {
            match tag_of_pattern(&arm.pattern.kind) {
                Some(tag) => match cases.iter_mut().find(|(existing, _)| *existing == tag) {
                    Some((_, list)) => list.push(index),
                    None => {
                        // A fresh tag group starts with every irrefutable
                        // arm seen so far, keeping source order intact.
                        let mut list = default_candidates.clone();
                        list.push(index);
                        cases.push((tag, list));
                    }
                },
                None => {
                    for (_, list) in &mut cases {
                        list.push(index);
                    }
                    default_candidates.push(index);
                }
            }
        }
        Self {
            cases,
            default_candidates,
        }
    }

    /// Candidate arm indices for a scrutinee, in source order.
    #[must_use]
    pub fn candidates(&self, scrutinee: &Value) -> Vec<usize> {
        let Some(tag) = tag_of_value(scrutinee) else {
            return self.default_candidates.clone();
        };
        self.cases
            .iter()
            .find(|(existing, _)| *existing == tag)
            .map_or_else(|| self.default_candidates.clone(), |(_, list)| list.clone())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        core::CorePattern,
        span::Span,
    };

    fn arm(kind: CorePatternKind) -> CoreArm {
        CoreArm {
            pattern: CorePattern {
                span: Span::point(1, 1),
                kind,
            },
            guard: None,
            body: crate::core::CoreExpr {
                sid: 0,
                span: Span::point(1, 1),
                kind: crate::core::CoreKind::Lit(Lit::Unit),
            },
        }
    }

    fn ctor(type_name: &str, name: &str) -> CorePatternKind {
        CorePatternKind::Ctor {
            type_name: type_name.to_owned(),
            ctor: name.to_owned(),
            args: Vec::new(),
        }
    }

    #[test]
    fn arms_group_by_constructor_tag() {
        let arms = vec![
            arm(ctor("Opt", "Some")),
            arm(ctor("Opt", "None")),
            arm(CorePatternKind::Wildcard),
        ];
        let tree = DecisionTree::compile(&arms);
        let some = Value::tagged("Opt", "Some", vec![]);
        let none = Value::tagged("Opt", "None", vec![]);
        assert_eq!(tree.candidates(&some), vec![0, 2]);
        assert_eq!(tree.candidates(&none), vec![1, 2]);
    }

    #[test]
    fn irrefutable_arms_keep_their_position() {
        // match n { 1 => ..., x => ..., 2 => ... }
        let arms = vec![
            arm(CorePatternKind::Lit(Lit::Int(1))),
            arm(CorePatternKind::Var("x".to_owned())),
            arm(CorePatternKind::Lit(Lit::Int(2))),
        ];
        let tree = DecisionTree::compile(&arms);
        // For scrutinee 2, the variable arm at index 1 must come before
        // the literal arm at index 2 — linear priority is preserved.
        assert_eq!(tree.candidates(&Value::Int(2)), vec![1, 2]);
        assert_eq!(tree.candidates(&Value::Int(1)), vec![0, 1]);
        assert_eq!(tree.candidates(&Value::Int(9)), vec![1]);
    }

    #[test]
    fn unmatched_tag_falls_to_irrefutable_arms() {
        let arms = vec![arm(ctor("Opt", "Some")), arm(CorePatternKind::Var("other".to_owned()))];
        let tree = DecisionTree::compile(&arms);
        assert_eq!(tree.candidates(&Value::Int(3)), vec![1]);
    }

    #[test]
    fn float_zero_signs_share_a_bucket() {
        // The linear matcher's `==` treats 0.0 and -0.0 as equal, so a
        // -0.0 scrutinee must still reach the 0.0 arm (and vice versa).
        let arms = vec![
            arm(CorePatternKind::Lit(Lit::Float(0.0))),
            arm(CorePatternKind::Wildcard),
        ];
        let tree = DecisionTree::compile(&arms);
        assert_eq!(tree.candidates(&Value::Float(-0.0)), vec![0, 1]);
        assert_eq!(tree.candidates(&Value::Float(0.0)), vec![0, 1]);

        let arms = vec![
            arm(CorePatternKind::Lit(Lit::Float(-0.0))),
            arm(CorePatternKind::Wildcard),
        ];
        let tree = DecisionTree::compile(&arms);
        assert_eq!(tree.candidates(&Value::Float(0.0)), vec![0, 1]);
    }

    #[test]
    fn nan_scrutinees_still_reach_fallback_arms() {
        // NaN matches no literal arm in linear mode; the tree must route a
        // NaN scrutinee past the numeric buckets to the irrefutable arm.
        let arms = vec![
            arm(CorePatternKind::Lit(Lit::Float(1.0))),
            arm(CorePatternKind::Lit(Lit::Float(f64::NAN))),
            arm(CorePatternKind::Var("other".to_owned())),
        ];
        let tree = DecisionTree::compile(&arms);
        let nan_candidates = tree.candidates(&Value::Float(f64::NAN));
        assert!(!nan_candidates.contains(&0), "NaN must not select the 1.0 bucket");
        assert!(nan_candidates.contains(&2), "NaN must reach the fallback arm");
        // A normal float never lands in the NaN bucket.
        assert_eq!(tree.candidates(&Value::Float(1.0)), vec![0, 2]);
    }
}
