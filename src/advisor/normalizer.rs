//! Query Normalizer
//!
//! Turns one logged operation into a [`Query`] of typed predicates, or
//! rejects it. Rejection is an ordinary outcome: the caller counts it and
//! moves on to the next operation.

use crate::model::{Operator, Predicate, Query, Value};
use crate::sources::{OperationType, RawQuery};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use thiserror::Error;

/// Why a logged query cannot be modelled
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedReason {
    /// `$or` or `$nor` anywhere in the filter
    Disjunction,
    /// `$and` below the top level
    NestedBoolean,
    /// An operator outside the supported set
    UnknownOperator(String),
    /// An operator document that also carries plain keys
    MixedOperatorDocument(String),
    /// Constraints on one field that cannot be folded into one predicate
    ConflictingPredicates(String),
    /// Operand of the wrong type for its operator
    InvalidOperand { field: String, operator: String },
    /// Filter, sort or `$and` clause that is not a document
    MalformedDocument,
    /// Sort on `$meta` (text score)
    TextSort,
    /// Aggregation pipelines are out of scope
    AggregationPipeline,
    /// Operation without a filter shape (insert, getMore, ...)
    UnsupportedOperation(String),
}

impl UnsupportedReason {
    /// Short stable label used to bucket skipped queries
    pub fn kind(&self) -> &'static str {
        match self {
            UnsupportedReason::Disjunction => "disjunction",
            UnsupportedReason::NestedBoolean => "nested_boolean",
            UnsupportedReason::UnknownOperator(_) => "unknown_operator",
            UnsupportedReason::MixedOperatorDocument(_) => "mixed_operator_document",
            UnsupportedReason::ConflictingPredicates(_) => "conflicting_predicates",
            UnsupportedReason::InvalidOperand { .. } => "invalid_operand",
            UnsupportedReason::MalformedDocument => "malformed_document",
            UnsupportedReason::TextSort => "text_sort",
            UnsupportedReason::AggregationPipeline => "aggregation_pipeline",
            UnsupportedReason::UnsupportedOperation(_) => "unsupported_operation",
        }
    }
}

impl fmt::Display for UnsupportedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsupportedReason::Disjunction => write!(f, "disjunctions ($or/$nor) are not supported"),
            UnsupportedReason::NestedBoolean => write!(f, "nested $and is not supported"),
            UnsupportedReason::UnknownOperator(op) => write!(f, "unsupported operator '{op}'"),
            UnsupportedReason::MixedOperatorDocument(field) => {
                write!(f, "field '{field}' mixes operators with plain keys")
            }
            UnsupportedReason::ConflictingPredicates(field) => {
                write!(f, "conflicting predicates on field '{field}'")
            }
            UnsupportedReason::InvalidOperand { field, operator } => {
                write!(f, "invalid operand for {operator} on field '{field}'")
            }
            UnsupportedReason::MalformedDocument => write!(f, "malformed query document"),
            UnsupportedReason::TextSort => write!(f, "text score sort is not supported"),
            UnsupportedReason::AggregationPipeline => write!(f, "aggregation pipelines are not supported"),
            UnsupportedReason::UnsupportedOperation(op) => write!(f, "operation '{op}' has no query shape"),
        }
    }
}

/// A logged query that was skipped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported query: {reason}")]
pub struct UnsupportedQuery {
    pub reason: UnsupportedReason,
}

impl From<UnsupportedReason> for UnsupportedQuery {
    fn from(reason: UnsupportedReason) -> Self {
        Self { reason }
    }
}

type NormalizeResult<T> = std::result::Result<T, UnsupportedReason>;

/// Normalize one logged operation.
pub fn normalize(raw: &RawQuery) -> std::result::Result<Query, UnsupportedQuery> {
    check_operation(&raw.operation)?;

    let mut predicates = PredicateSet::default();
    match &raw.filter {
        JsonValue::Object(filter) => {
            for (key, value) in filter {
                parse_clause(key, value, false, &mut predicates)?;
            }
        }
        JsonValue::Null => {}
        _ => return Err(UnsupportedReason::MalformedDocument.into()),
    }

    let sort = parse_sort(raw.sort.as_ref())?;
    let projection = parse_projection(raw.projection.as_ref());
    let limit = raw
        .limit
        .map(i64::unsigned_abs)
        .filter(|&limit| limit > 0);

    Ok(Query::from_parts(predicates.into_inner(), sort, projection, limit))
}

fn check_operation(operation: &OperationType) -> NormalizeResult<()> {
    match operation {
        OperationType::Query
        | OperationType::Count
        | OperationType::Distinct
        | OperationType::Update
        | OperationType::Delete
        | OperationType::FindAndModify => Ok(()),
        OperationType::Aggregate => Err(UnsupportedReason::AggregationPipeline),
        other => Err(UnsupportedReason::UnsupportedOperation(other.to_string())),
    }
}

/// Predicates in first-appearance order, one per field.
#[derive(Default)]
struct PredicateSet {
    predicates: Vec<Predicate>,
}

impl PredicateSet {
    fn add(&mut self, predicate: Predicate) -> NormalizeResult<()> {
        match self
            .predicates
            .iter_mut()
            .find(|p| p.field() == predicate.field())
        {
            Some(existing) => {
                *existing = existing.merge(&predicate).ok_or_else(|| {
                    UnsupportedReason::ConflictingPredicates(predicate.field().to_string())
                })?;
            }
            None => self.predicates.push(predicate),
        }
        Ok(())
    }

    fn into_inner(self) -> Vec<Predicate> {
        self.predicates
    }
}

fn parse_clause(
    key: &str,
    value: &JsonValue,
    inside_and: bool,
    predicates: &mut PredicateSet,
) -> NormalizeResult<()> {
    match key {
        "$and" if inside_and => Err(UnsupportedReason::NestedBoolean),
        "$and" => {
            let clauses = value.as_array().ok_or(UnsupportedReason::MalformedDocument)?;
            for clause in clauses {
                let clause = clause.as_object().ok_or(UnsupportedReason::MalformedDocument)?;
                for (k, v) in clause {
                    parse_clause(k, v, true, predicates)?;
                }
            }
            Ok(())
        }
        "$or" | "$nor" => Err(UnsupportedReason::Disjunction),
        "$comment" => Ok(()),
        op if op.starts_with('$') => Err(UnsupportedReason::UnknownOperator(op.to_string())),
        field => predicates.add(parse_field(field, value)?),
    }
}

fn parse_field(field: &str, value: &JsonValue) -> NormalizeResult<Predicate> {
    let JsonValue::Object(doc) = value else {
        return Ok(literal_predicate(field, Value::from_json(value)));
    };
    if let Some(literal) = Value::extended_literal(doc) {
        return Ok(literal_predicate(field, literal));
    }

    let operator_keys = doc.keys().filter(|k| k.starts_with('$')).count();
    if operator_keys == 0 {
        // Equality on an embedded document
        return Ok(Predicate::eq(field, Value::from_json(value)));
    }
    if operator_keys != doc.len() {
        return Err(UnsupportedReason::MixedOperatorDocument(field.to_string()));
    }
    parse_operator_document(field, doc)
}

fn literal_predicate(field: &str, value: Value) -> Predicate {
    match value {
        Value::Regex { pattern, options } => Predicate::regex(field, pattern, options),
        other => Predicate::eq(field, other),
    }
}

fn parse_operator_document(field: &str, doc: &Map<String, JsonValue>) -> NormalizeResult<Predicate> {
    let mut result: Option<Predicate> = None;
    let mut options: Option<String> = None;

    for (key, operand) in doc {
        if key == "$options" {
            let opts = operand.as_str().ok_or_else(|| invalid(field, "$options"))?;
            options = Some(opts.to_string());
            continue;
        }
        let operator = match key.as_str() {
            "$or" | "$nor" => return Err(UnsupportedReason::Disjunction),
            "$and" => return Err(UnsupportedReason::NestedBoolean),
            other => Operator::from_mql(other)
                .ok_or_else(|| UnsupportedReason::UnknownOperator(other.to_string()))?,
        };
        let predicate = build_predicate(field, operator, operand)?;
        result = Some(match result {
            None => predicate,
            Some(previous) => previous
                .merge(&predicate)
                .ok_or_else(|| UnsupportedReason::ConflictingPredicates(field.to_string()))?,
        });
    }

    match (result, options) {
        (Some(predicate), None) => Ok(predicate),
        (Some(predicate), Some(options)) if predicate.operator() == Operator::Regex => {
            match predicate.operand() {
                crate::model::Operand::Pattern { pattern, .. } => {
                    Ok(Predicate::regex(field, pattern.clone(), options))
                }
                _ => Err(invalid(field, "$options")),
            }
        }
        _ => Err(invalid(field, "$options")),
    }
}

fn build_predicate(field: &str, operator: Operator, operand: &JsonValue) -> NormalizeResult<Predicate> {
    let predicate = match operator {
        Operator::Eq => Predicate::eq(field, Value::from_json(operand)),
        Operator::Ne => Predicate::ne(field, Value::from_json(operand)),
        Operator::In | Operator::Nin => {
            let values: Vec<Value> = operand
                .as_array()
                .filter(|items| !items.is_empty())
                .ok_or_else(|| invalid(field, operator.as_mql()))?
                .iter()
                .map(Value::from_json)
                .collect();
            if operator == Operator::In {
                Predicate::in_list(field, values)
            } else {
                Predicate::not_in(field, values)
            }
        }
        Operator::Exists => {
            let present = match operand {
                JsonValue::Bool(b) => *b,
                JsonValue::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
                _ => return Err(invalid(field, "$exists")),
            };
            Predicate::exists(field, present)
        }
        Operator::Regex => match Value::from_json(operand) {
            Value::String(pattern) => Predicate::regex(field, pattern, ""),
            Value::Regex { pattern, options } => Predicate::regex(field, pattern, options),
            _ => return Err(invalid(field, "$regex")),
        },
        Operator::Size => {
            let size = match Value::from_json(operand) {
                Value::Integer(n) if n >= 0 => n as u64,
                Value::Float(x) if x >= 0.0 && x.fract() == 0.0 => x as u64,
                _ => return Err(invalid(field, "$size")),
            };
            Predicate::size(field, size)
        }
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            Predicate::range(field, operator, Value::from_json(operand))
        }
    };
    Ok(predicate)
}

fn invalid(field: &str, operator: &str) -> UnsupportedReason {
    UnsupportedReason::InvalidOperand {
        field: field.to_string(),
        operator: operator.to_string(),
    }
}

fn parse_sort(sort: Option<&JsonValue>) -> NormalizeResult<Vec<String>> {
    let doc = match sort {
        None | Some(JsonValue::Null) => return Ok(Vec::new()),
        Some(JsonValue::Object(doc)) => doc,
        Some(_) => return Err(UnsupportedReason::MalformedDocument),
    };
    let mut fields = Vec::with_capacity(doc.len());
    for (field, direction) in doc {
        if field == "$natural" {
            continue;
        }
        if direction.get("$meta").is_some() {
            return Err(UnsupportedReason::TextSort);
        }
        fields.push(field.clone());
    }
    Ok(fields)
}

/// Included projection fields; exclusion-only projections cover nothing.
fn parse_projection(projection: Option<&JsonValue>) -> Option<Vec<String>> {
    let doc = projection?.as_object()?;
    let included: Vec<String> = doc
        .iter()
        .filter(|(_, spec)| match spec {
            JsonValue::Bool(b) => *b,
            JsonValue::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
            // $slice, $elemMatch and computed fields read the field
            _ => true,
        })
        .map(|(field, _)| field.clone())
        .collect();
    (!included.is_empty()).then_some(included)
}
