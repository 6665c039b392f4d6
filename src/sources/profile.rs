//! Profiler workload sources
//!
//! Reads `system.profile` documents, as exported with `mongoexport` or
//! `mongosh --eval ... | jq -c`, one JSON document per line.

use super::{OperationType, RawQuery, WorkloadSource};
use crate::error::SourceError;
use crate::model::Value;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

/// One profiler document
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProfileEntry {
    pub op: String,
    #[serde(default)]
    pub ns: Option<String>,
    /// Command document (MongoDB 3.6+ layout)
    #[serde(default)]
    pub command: Option<Map<String, JsonValue>>,
    /// Legacy query document, possibly wrapped in `$query`/`$orderby`
    #[serde(default)]
    pub query: Option<JsonValue>,
}

impl ProfileEntry {
    pub fn parse_line(line: &str) -> Result<Self, SourceError> {
        serde_json::from_str(line).map_err(|e| SourceError::Malformed(e.to_string()))
    }

    pub fn collection(&self) -> Option<&str> {
        self.ns.as_deref().and_then(|ns| ns.split_once('.')).map(|(_, coll)| coll)
    }

    /// Map the profiled operation onto a raw query.
    pub fn to_raw_query(&self) -> RawQuery {
        let command = self.command.as_ref();
        let get = |key: &str| command.and_then(|c| c.get(key)).cloned();

        let operation = match self.op.as_str() {
            "query" => OperationType::Query,
            "update" => OperationType::Update,
            "remove" | "delete" => OperationType::Delete,
            "insert" => OperationType::Insert,
            "getmore" => OperationType::GetMore,
            "command" => command_operation(command),
            other => OperationType::Other(other.to_string()),
        };

        let mut raw = RawQuery {
            operation,
            namespace: self.ns.clone(),
            ..Default::default()
        };

        match raw.operation {
            OperationType::Query if command.is_some_and(|c| c.contains_key("find")) => {
                raw.filter = get("filter").unwrap_or(JsonValue::Null);
                raw.sort = get("sort");
                raw.projection = get("projection");
                raw.limit = get("limit").as_ref().and_then(limit_of);
            }
            OperationType::Query => {
                let (filter, sort) = unwrap_legacy(self.query.clone());
                raw.filter = filter;
                raw.sort = sort;
            }
            OperationType::Count | OperationType::Distinct => {
                raw.filter = get("query").unwrap_or(JsonValue::Null);
                raw.limit = get("limit").as_ref().and_then(limit_of);
            }
            OperationType::FindAndModify => {
                raw.filter = get("query").unwrap_or(JsonValue::Null);
                raw.sort = get("sort");
            }
            OperationType::Update | OperationType::Delete => {
                raw.filter = get("q")
                    .or_else(|| self.query.clone())
                    .unwrap_or(JsonValue::Null);
                raw.limit = get("limit").as_ref().and_then(limit_of);
            }
            _ => {}
        }
        raw
    }
}

fn command_operation(command: Option<&Map<String, JsonValue>>) -> OperationType {
    // The command name is the first key of the command document.
    let Some(name) = command.and_then(|c| c.keys().next()) else {
        return OperationType::Command;
    };
    match name.as_str() {
        "find" => OperationType::Query,
        "count" => OperationType::Count,
        "distinct" => OperationType::Distinct,
        "findAndModify" | "findandmodify" => OperationType::FindAndModify,
        "aggregate" => OperationType::Aggregate,
        _ => OperationType::Command,
    }
}

fn unwrap_legacy(query: Option<JsonValue>) -> (JsonValue, Option<JsonValue>) {
    match query {
        Some(JsonValue::Object(mut doc)) if doc.contains_key("$query") => {
            let filter = doc.remove("$query").unwrap_or(JsonValue::Null);
            let sort = doc.remove("$orderby").or_else(|| doc.remove("orderby"));
            (filter, sort)
        }
        Some(other) => (other, None),
        None => (JsonValue::Null, None),
    }
}

fn limit_of(value: &JsonValue) -> Option<i64> {
    match Value::from_json(value) {
        Value::Integer(n) => Some(n),
        Value::Float(f) if f.is_finite() => Some(f as i64),
        _ => None,
    }
}

/// Workload read lazily from a JSON-lines profiler export
#[derive(Debug, Clone)]
pub struct JsonLinesWorkload {
    path: PathBuf,
}

impl JsonLinesWorkload {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl WorkloadSource for JsonLinesWorkload {
    type Queries = ProfileLines<BufReader<File>>;

    fn open(self, namespace: &str) -> Result<Self::Queries, SourceError> {
        let file = File::open(&self.path)
            .map_err(|e| SourceError::Unavailable(format!("{}: {}", self.path.display(), e)))?;
        Ok(ProfileLines::new(BufReader::new(file), namespace))
    }
}

/// Iterator over the operations of one namespace in a profiler export.
/// Blank lines and operations on other namespaces are skipped.
pub struct ProfileLines<R> {
    lines: Lines<R>,
    namespace: String,
    line_number: usize,
}

impl<R: BufRead> ProfileLines<R> {
    pub fn new(reader: R, namespace: &str) -> Self {
        Self {
            lines: reader.lines(),
            namespace: namespace.to_string(),
            line_number: 0,
        }
    }

    fn matches_namespace(&self, entry: &ProfileEntry) -> bool {
        // An empty namespace selects everything; so does a missing `ns`.
        self.namespace.is_empty()
            || entry.ns.as_deref().map_or(true, |ns| ns == self.namespace)
    }
}

impl<R: BufRead> Iterator for ProfileLines<R> {
    type Item = Result<RawQuery, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(SourceError::Transient(e.to_string()))),
            };
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            let entry = match ProfileEntry::parse_line(&line) {
                Ok(entry) => entry,
                Err(SourceError::Malformed(msg)) => {
                    return Some(Err(SourceError::Malformed(format!("line {}: {}", self.line_number, msg))))
                }
                Err(err) => return Some(Err(err)),
            };
            if self.matches_namespace(&entry) {
                return Some(Ok(entry.to_raw_query()));
            }
        }
    }
}

/// In-memory workload of already-decoded raw queries
#[derive(Debug, Clone, Default)]
pub struct VecWorkload {
    queries: Vec<RawQuery>,
}

impl VecWorkload {
    pub fn new(queries: Vec<RawQuery>) -> Self {
        Self { queries }
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

impl FromIterator<RawQuery> for VecWorkload {
    fn from_iter<I: IntoIterator<Item = RawQuery>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl WorkloadSource for VecWorkload {
    type Queries = std::iter::Map<std::vec::IntoIter<RawQuery>, fn(RawQuery) -> Result<RawQuery, SourceError>>;

    /// Queries carrying a different namespace are dropped; queries without
    /// one are kept.
    fn open(self, namespace: &str) -> Result<Self::Queries, SourceError> {
        let queries: Vec<RawQuery> = self
            .queries
            .into_iter()
            .filter(|q| namespace.is_empty() || q.namespace.as_deref().map_or(true, |ns| ns == namespace))
            .collect();
        Ok(queries.into_iter().map(Ok as fn(RawQuery) -> Result<RawQuery, SourceError>))
    }
}
