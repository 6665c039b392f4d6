//! In-memory document sample
//!
//! Evaluates conjunctions directly against a vector of decoded documents.
//! Matching follows MongoDB query semantics closely enough for counting:
//! dotted paths descend into embedded documents and arrays, an array field
//! matches when any element does, and values only compare within their type
//! bracket.

use super::SampleSource;
use crate::error::{Result, SourceError};
use crate::model::{Bound, Conjunction, Operand, Operator, Predicate, Value};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// A document sample held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySample {
    documents: Vec<Value>,
    collection_count: Option<u64>,
}

impl InMemorySample {
    pub fn new(documents: Vec<Value>) -> Self {
        Self {
            documents,
            collection_count: None,
        }
    }

    pub fn from_documents<I>(documents: I) -> Self
    where
        I: IntoIterator<Item = JsonValue>,
    {
        Self::new(documents.into_iter().map(|d| Value::from_json(&d)).collect())
    }

    /// Load one JSON (or relaxed Extended JSON) document per line. Blank
    /// lines are ignored.
    pub fn from_json_lines(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let sample = Self::from_reader(BufReader::new(file))?;
        debug!(
            path = %path.as_ref().display(),
            documents = sample.len(),
            "Loaded document sample"
        );
        Ok(sample)
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut documents = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let json: JsonValue = serde_json::from_str(&line)?;
            documents.push(Value::from_json(&json));
        }
        Ok(Self::new(documents))
    }

    /// Size of the collection the sample was drawn from.
    pub fn with_collection_count(mut self, count: u64) -> Self {
        self.collection_count = Some(count);
        self
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[Value] {
        &self.documents
    }

    /// Count documents matching every predicate of `conjunction`.
    pub fn count(&self, conjunction: &Conjunction) -> std::result::Result<u64, SourceError> {
        let matchers = conjunction
            .predicates()
            .iter()
            .map(FieldMatcher::compile)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(self
            .documents
            .iter()
            .filter(|doc| matchers.iter().all(|m| m.matches(doc)))
            .count() as u64)
    }
}

#[async_trait]
impl SampleSource for InMemorySample {
    async fn total_count(&self) -> std::result::Result<u64, SourceError> {
        Ok(self.documents.len() as u64)
    }

    async fn count_matching(&self, conjunction: &Conjunction) -> std::result::Result<u64, SourceError> {
        self.count(conjunction)
    }

    async fn collection_count(&self) -> std::result::Result<Option<u64>, SourceError> {
        Ok(self.collection_count)
    }
}

enum Matcher {
    Eq(Value),
    Ne(Value),
    In { values: Vec<Value>, patterns: Vec<Regex> },
    Nin { values: Vec<Value>, patterns: Vec<Regex> },
    Exists(bool),
    Regex(Regex),
    Size(u64),
    Range { lower: Option<Bound>, upper: Option<Bound> },
}

/// A predicate compiled for repeated evaluation
struct FieldMatcher {
    path: Vec<String>,
    matcher: Matcher,
}

impl FieldMatcher {
    fn compile(predicate: &Predicate) -> std::result::Result<Self, SourceError> {
        let matcher = match (predicate.operator(), predicate.operand()) {
            (Operator::Eq, Operand::Value(v)) => Matcher::Eq(v.clone()),
            (Operator::Ne, Operand::Value(v)) => Matcher::Ne(v.clone()),
            (Operator::In, Operand::List(items)) => {
                let (values, patterns) = split_patterns(items)?;
                Matcher::In { values, patterns }
            }
            (Operator::Nin, Operand::List(items)) => {
                let (values, patterns) = split_patterns(items)?;
                Matcher::Nin { values, patterns }
            }
            (Operator::Exists, Operand::Flag(present)) => Matcher::Exists(*present),
            (Operator::Regex, Operand::Pattern { pattern, options }) => {
                Matcher::Regex(build_regex(pattern, options)?)
            }
            (Operator::Size, Operand::Size(n)) => Matcher::Size(*n),
            (_, Operand::Range { lower, upper }) => Matcher::Range {
                lower: lower.clone(),
                upper: upper.clone(),
            },
            (operator, _) => {
                return Err(SourceError::Transient(format!(
                    "cannot evaluate {} on '{}'",
                    operator,
                    predicate.field()
                )))
            }
        };
        Ok(Self {
            path: predicate.field().split('.').map(str::to_string).collect(),
            matcher,
        })
    }

    fn matches(&self, document: &Value) -> bool {
        let mut found = Vec::new();
        lookup(document, &self.path, &mut found);

        match &self.matcher {
            Matcher::Eq(target) => equals_any(&found, target),
            Matcher::Ne(target) => !equals_any(&found, target),
            Matcher::In { values, patterns } => in_list(&found, values, patterns),
            Matcher::Nin { values, patterns } => !in_list(&found, values, patterns),
            Matcher::Exists(present) => found.is_empty() != *present,
            Matcher::Regex(regex) => elements(&found).any(|v| regex_matches(regex, v)),
            Matcher::Size(n) => found
                .iter()
                .any(|v| matches!(v, Value::Array(items) if items.len() as u64 == *n)),
            Matcher::Range { lower, upper } => {
                let lower_ok = lower.as_ref().map_or(true, |b| {
                    elements(&found).any(|v| satisfies(v, b, Ordering::Greater))
                });
                let upper_ok = upper.as_ref().map_or(true, |b| {
                    elements(&found).any(|v| satisfies(v, b, Ordering::Less))
                });
                !found.is_empty() && lower_ok && upper_ok
            }
        }
    }
}

/// Collect every value reachable through `path`, descending into arrays.
fn lookup<'a>(value: &'a Value, path: &[String], out: &mut Vec<&'a Value>) {
    let Some((key, rest)) = path.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Document(fields) => {
            if let Some((_, child)) = fields.iter().find(|(k, _)| k == key) {
                lookup(child, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = key.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    lookup(item, rest, out);
                }
            }
            for item in items {
                if matches!(item, Value::Document(_)) {
                    lookup(item, path, out);
                }
            }
        }
        _ => {}
    }
}

/// Found values with arrays expanded to their elements
fn elements<'a>(found: &'a [&'a Value]) -> impl Iterator<Item = &'a Value> + 'a {
    found.iter().flat_map(|v| match v {
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        other => vec![*other],
    })
}

fn equals_any(found: &[&Value], target: &Value) -> bool {
    if target.is_null() && found.is_empty() {
        return true;
    }
    found.iter().any(|v| {
        v.loosely_equals(target)
            || matches!(v, Value::Array(items) if items.iter().any(|i| i.loosely_equals(target)))
    })
}

fn in_list(found: &[&Value], values: &[Value], patterns: &[Regex]) -> bool {
    values.iter().any(|target| equals_any(found, target))
        || patterns
            .iter()
            .any(|regex| elements(found).any(|v| regex_matches(regex, v)))
}

fn satisfies(value: &Value, bound: &Bound, wanted: Ordering) -> bool {
    match value.compare(&bound.value) {
        Some(Ordering::Equal) => bound.inclusive,
        Some(ordering) => ordering == wanted,
        None => false,
    }
}

fn regex_matches(regex: &Regex, value: &Value) -> bool {
    match value {
        Value::String(s) => regex.is_match(s),
        _ => false,
    }
}

fn split_patterns(items: &[Value]) -> std::result::Result<(Vec<Value>, Vec<Regex>), SourceError> {
    let mut values = Vec::new();
    let mut patterns = Vec::new();
    for item in items {
        match item {
            Value::Regex { pattern, options } => patterns.push(build_regex(pattern, options)?),
            other => values.push(other.clone()),
        }
    }
    Ok((values, patterns))
}

fn build_regex(pattern: &str, options: &str) -> std::result::Result<Regex, SourceError> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| SourceError::Transient(format!("invalid pattern /{pattern}/: {e}")))
}
