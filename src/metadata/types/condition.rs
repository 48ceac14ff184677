//! Closed condition language used for per-entry format dispatch and
//! subdirectory validation.
//!
//! A condition can only look at the entry's declared format, its count, and
//! values already extracted for sibling entries. There is no scripting hook.

use super::value::{Format, Value};

/// Literal compared against a sibling value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Text(&'static str),
}

impl Literal {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Literal::Int(expected) => value.as_i64() == Some(*expected),
            Literal::Text(expected) => value.as_text().map(str::trim) == Some(*expected),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Always,
    FormatIs(Format),
    CountIs(u64),
    CountAtLeast(u64),
    CountAtMost(u64),
    SiblingPresent(&'static str),
    SiblingEquals(&'static str, Literal),
    SiblingStartsWith(&'static str, &'static str),
    Not(Box<Condition>),
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

/// Source of sibling values for [`Condition::SiblingPresent`] and friends.
///
/// The walker answers from the current directory first, then from anything
/// already extracted earlier in the walk.
pub trait SiblingValues {
    fn sibling_value(&self, name: &str) -> Option<&Value>;
}

/// The fixed set of fields a condition may inspect.
pub struct ConditionContext<'a> {
    /// Format code stored in the entry, if it mapped to a known format.
    pub declared: Option<Format>,
    pub count: u64,
    pub siblings: &'a dyn SiblingValues,
}

impl Condition {
    pub fn not(inner: Condition) -> Self {
        Condition::Not(Box::new(inner))
    }

    pub fn evaluate(&self, ctx: &ConditionContext<'_>) -> bool {
        match self {
            Condition::Always => true,
            Condition::FormatIs(format) => ctx.declared == Some(*format),
            Condition::CountIs(n) => ctx.count == *n,
            Condition::CountAtLeast(n) => ctx.count >= *n,
            Condition::CountAtMost(n) => ctx.count <= *n,
            Condition::SiblingPresent(name) => ctx.siblings.sibling_value(name).is_some(),
            Condition::SiblingEquals(name, literal) => ctx
                .siblings
                .sibling_value(name)
                .is_some_and(|v| literal.matches(v)),
            Condition::SiblingStartsWith(name, prefix) => ctx
                .siblings
                .sibling_value(name)
                .and_then(Value::as_text)
                .is_some_and(|text| text.starts_with(prefix)),
            Condition::Not(inner) => !inner.evaluate(ctx),
            Condition::All(all) => all.iter().all(|c| c.evaluate(ctx)),
            Condition::Any(any) => any.iter().any(|c| c.evaluate(ctx)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Map(HashMap<&'static str, Value>);

    impl SiblingValues for Map {
        fn sibling_value(&self, name: &str) -> Option<&Value> {
            self.0.get(name)
        }
    }

    #[test]
    fn combinators_over_sibling_values() {
        let mut map = HashMap::new();
        map.insert("Make", Value::Text("Canon ".to_string()));
        map.insert("Version", Value::Unsigned(vec![2]));
        let siblings = Map(map);
        let ctx = ConditionContext {
            declared: Some(Format::U16),
            count: 4,
            siblings: &siblings,
        };

        assert!(Condition::SiblingEquals("Make", Literal::Text("Canon")).evaluate(&ctx));
        assert!(Condition::SiblingStartsWith("Make", "Can").evaluate(&ctx));
        assert!(Condition::All(vec![
            Condition::FormatIs(Format::U16),
            Condition::CountAtLeast(4),
            Condition::SiblingEquals("Version", Literal::Int(2)),
        ])
        .evaluate(&ctx));
        assert!(!Condition::Any(vec![
            Condition::CountIs(3),
            Condition::SiblingPresent("Model"),
        ])
        .evaluate(&ctx));
        assert!(Condition::not(Condition::FormatIs(Format::U32)).evaluate(&ctx));
    }
}
