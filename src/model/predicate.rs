use super::value::Value;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Comparison operators recognised in a query filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    In,
    Exists,
    Regex,
    Size,
    Ne,
    Nin,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Operator families, used for shape signatures and index field ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorClass {
    Equality,
    Range,
    Exclusion,
    ExistencePattern,
}

impl Operator {
    /// Parse a `$`-prefixed filter operator. `$options` is not an operator on
    /// its own and is handled together with `$regex`.
    pub fn from_mql(key: &str) -> Option<Self> {
        let op = match key {
            "$eq" => Operator::Eq,
            "$in" => Operator::In,
            "$exists" => Operator::Exists,
            "$regex" => Operator::Regex,
            "$size" => Operator::Size,
            "$ne" => Operator::Ne,
            "$nin" => Operator::Nin,
            "$gt" => Operator::Gt,
            "$gte" => Operator::Gte,
            "$lt" => Operator::Lt,
            "$lte" => Operator::Lte,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_mql(&self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::In => "$in",
            Operator::Exists => "$exists",
            Operator::Regex => "$regex",
            Operator::Size => "$size",
            Operator::Ne => "$ne",
            Operator::Nin => "$nin",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
        }
    }

    /// `$in` is equality-class regardless of list length.
    pub fn class(&self) -> OperatorClass {
        match self {
            Operator::Eq | Operator::In => OperatorClass::Equality,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => OperatorClass::Range,
            Operator::Ne | Operator::Nin => OperatorClass::Exclusion,
            Operator::Exists | Operator::Regex | Operator::Size => OperatorClass::ExistencePattern,
        }
    }

    pub fn is_lower_bound(&self) -> bool {
        matches!(self, Operator::Gt | Operator::Gte)
    }

    pub fn is_upper_bound(&self) -> bool {
        matches!(self, Operator::Lt | Operator::Lte)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_mql()[1..])
    }
}

impl fmt::Display for OperatorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatorClass::Equality => "equality",
            OperatorClass::Range => "range",
            OperatorClass::Exclusion => "exclusion",
            OperatorClass::ExistencePattern => "existence",
        };
        f.write_str(name)
    }
}

/// One side of a range predicate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bound {
    pub value: Value,
    pub inclusive: bool,
}

/// Literal payload bound to an operator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// `eq`, `ne`
    Value(Value),
    /// `in`, `nin`; never empty
    List(Vec<Value>),
    /// `exists`
    Flag(bool),
    /// `regex`
    Pattern { pattern: String, options: String },
    /// `size`
    Size(u64),
    /// `gt`, `gte`, `lt`, `lte`; at least one bound is present
    Range {
        lower: Option<Bound>,
        upper: Option<Bound>,
    },
}

/// A single normalized constraint on one field path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Predicate {
    field: String,
    operator: Operator,
    operand: Operand,
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, Operator::Eq, Operand::Value(value))
    }

    pub fn ne(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, Operator::Ne, Operand::Value(value))
    }

    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, Operator::In, Operand::List(values))
    }

    pub fn not_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, Operator::Nin, Operand::List(values))
    }

    pub fn exists(field: impl Into<String>, present: bool) -> Self {
        Self::new(field, Operator::Exists, Operand::Flag(present))
    }

    pub fn regex(field: impl Into<String>, pattern: impl Into<String>, options: impl Into<String>) -> Self {
        Self::new(
            field,
            Operator::Regex,
            Operand::Pattern {
                pattern: pattern.into(),
                options: options.into(),
            },
        )
    }

    pub fn size(field: impl Into<String>, size: u64) -> Self {
        Self::new(field, Operator::Size, Operand::Size(size))
    }

    /// Build a one-sided range predicate. Panics in debug builds if
    /// `operator` is not a range operator.
    pub fn range(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        debug_assert_eq!(operator.class(), OperatorClass::Range);
        let bound = Bound {
            value,
            inclusive: matches!(operator, Operator::Gte | Operator::Lte),
        };
        let operand = if operator.is_lower_bound() {
            Operand::Range { lower: Some(bound), upper: None }
        } else {
            Operand::Range { lower: None, upper: Some(bound) }
        };
        Self::new(field, operator, operand)
    }

    fn new(field: impl Into<String>, operator: Operator, operand: Operand) -> Self {
        Self {
            field: field.into(),
            operator,
            operand,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    pub fn class(&self) -> OperatorClass {
        self.operator.class()
    }

    /// Combine two predicates on the same field into one, if the result is
    /// unambiguous: a lower and an upper range bound. Anything else is a
    /// conflict and yields `None`.
    pub fn merge(&self, other: &Predicate) -> Option<Predicate> {
        if self.field != other.field {
            return None;
        }
        match (&self.operand, &other.operand) {
            (
                Operand::Range { lower: l1, upper: u1 },
                Operand::Range { lower: l2, upper: u2 },
            ) => {
                let lower = match (l1, l2) {
                    (Some(_), Some(_)) => return None,
                    (l, None) | (None, l) => l.clone(),
                };
                let upper = match (u1, u2) {
                    (Some(_), Some(_)) => return None,
                    (u, None) | (None, u) => u.clone(),
                };
                Some(Self::new(self.field.clone(), self.operator, Operand::Range { lower, upper }))
            }
            _ => None,
        }
    }

    /// Render this predicate's right-hand side as a filter document value.
    pub fn to_filter_value(&self) -> JsonValue {
        let mut doc = Map::new();
        match &self.operand {
            Operand::Value(value) => {
                // Plain documents would read back as operator documents.
                if self.operator == Operator::Eq && !matches!(value, Value::Document(_)) {
                    return value.to_json();
                }
                doc.insert(self.operator.as_mql().to_string(), value.to_json());
            }
            Operand::List(values) => {
                doc.insert(
                    self.operator.as_mql().to_string(),
                    JsonValue::Array(values.iter().map(Value::to_json).collect()),
                );
            }
            Operand::Flag(present) => {
                doc.insert("$exists".to_string(), JsonValue::Bool(*present));
            }
            Operand::Pattern { pattern, options } => {
                doc.insert("$regex".to_string(), JsonValue::String(pattern.clone()));
                if !options.is_empty() {
                    doc.insert("$options".to_string(), JsonValue::String(options.clone()));
                }
            }
            Operand::Size(size) => {
                doc.insert("$size".to_string(), JsonValue::from(*size));
            }
            Operand::Range { lower, upper } => {
                if let Some(bound) = lower {
                    let op = if bound.inclusive { "$gte" } else { "$gt" };
                    doc.insert(op.to_string(), bound.value.to_json());
                }
                if let Some(bound) = upper {
                    let op = if bound.inclusive { "$lte" } else { "$lt" };
                    doc.insert(op.to_string(), bound.value.to_json());
                }
            }
        }
        JsonValue::Object(doc)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.to_filter_value())
    }
}

/// Conjunction of predicates issued against the sample
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Conjunction {
    predicates: Vec<Predicate>,
}

impl Conjunction {
    /// Predicates are kept ordered by field so equal conjunctions render
    /// identically.
    pub fn new(mut predicates: Vec<Predicate>) -> Self {
        predicates.sort_by(|a, b| a.field.cmp(&b.field));
        Self { predicates }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Render as a MongoDB filter document, suitable for `$match` or
    /// `countDocuments`.
    pub fn to_filter(&self) -> JsonValue {
        JsonValue::Object(
            self.predicates
                .iter()
                .map(|p| (p.field.clone(), p.to_filter_value()))
                .collect(),
        )
    }

    /// Stable textual key, equal for structurally equal conjunctions.
    pub fn cache_key(&self) -> String {
        self.to_filter().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_classes() {
        assert_eq!(Operator::Eq.class(), OperatorClass::Equality);
        assert_eq!(Operator::In.class(), OperatorClass::Equality);
        assert_eq!(Operator::Gte.class(), OperatorClass::Range);
        assert_eq!(Operator::Nin.class(), OperatorClass::Exclusion);
        assert_eq!(Operator::Regex.class(), OperatorClass::ExistencePattern);
        assert_eq!(Operator::from_mql("$options"), None);
        assert_eq!(Operator::from_mql("$lte"), Some(Operator::Lte));
    }

    #[test]
    fn test_range_merge() {
        let lower = Predicate::range("age", Operator::Gte, Value::Integer(18));
        let upper = Predicate::range("age", Operator::Lt, Value::Integer(65));
        let merged = lower.merge(&upper).expect("opposite bounds merge");
        assert_eq!(merged.operator(), Operator::Gte);
        assert_eq!(merged.to_filter_value(), json!({"$gte": 18, "$lt": 65}));

        // Two lower bounds are ambiguous
        let other_lower = Predicate::range("age", Operator::Gt, Value::Integer(21));
        assert!(lower.merge(&other_lower).is_none());

        // Different classes never merge
        let eq = Predicate::eq("age", Value::Integer(30));
        assert!(lower.merge(&eq).is_none());
    }

    #[test]
    fn test_filter_rendering() {
        assert_eq!(Predicate::eq("a", Value::Integer(1)).to_filter_value(), json!(1));
        assert_eq!(
            Predicate::in_list("a", vec![Value::Integer(1), Value::Integer(2)]).to_filter_value(),
            json!({"$in": [1, 2]})
        );
        assert_eq!(Predicate::regex("n", "^bo", "i").to_filter_value(), json!({"$regex": "^bo", "$options": "i"}));
        assert_eq!(Predicate::exists("x", false).to_filter_value(), json!({"$exists": false}));
        let embedded = Value::from_json(&json!({"zip": 1}));
        assert_eq!(Predicate::eq("addr", embedded).to_filter_value(), json!({"$eq": {"zip": 1}}));
    }

    #[test]
    fn test_conjunction_key_is_order_independent() {
        let a = Predicate::eq("a", Value::Integer(1));
        let b = Predicate::range("b", Operator::Gt, Value::Integer(5));
        let first = Conjunction::new(vec![a.clone(), b.clone()]);
        let second = Conjunction::new(vec![b, a]);
        assert_eq!(first.cache_key(), second.cache_key());
        assert_eq!(first.to_filter(), json!({"a": 1, "b": {"$gt": 5}}));
    }
}
