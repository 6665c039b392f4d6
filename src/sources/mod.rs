//! External collaborators
//!
//! The advisor never talks to a database itself. It consumes a
//! [`WorkloadSource`] (logged operations), a [`SampleSource`] (counts against
//! a document sample) and hands its ranked output to a [`ResultSink`]. The
//! implementations here are file- and memory-backed; a driver-backed source
//! only has to implement the same traits.

pub mod memory;
pub mod profile;
pub mod sink;

use crate::advisor::AdvisorReport;
use crate::error::SourceError;
use crate::model::Conjunction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

pub use memory::InMemorySample;
pub use profile::{JsonLinesWorkload, ProfileEntry, ProfileLines, VecWorkload};
pub use sink::{OutputFormat, VecSink, WriterSink};

/// Kind of logged operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    #[default]
    Query,
    Count,
    Distinct,
    Update,
    Delete,
    FindAndModify,
    Aggregate,
    Insert,
    GetMore,
    Command,
    Other(String),
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Query => "query",
            OperationType::Count => "count",
            OperationType::Distinct => "distinct",
            OperationType::Update => "update",
            OperationType::Delete => "remove",
            OperationType::FindAndModify => "findAndModify",
            OperationType::Aggregate => "aggregate",
            OperationType::Insert => "insert",
            OperationType::GetMore => "getmore",
            OperationType::Command => "command",
            OperationType::Other(name) => name,
        };
        f.write_str(name)
    }
}

/// One logged operation as read from the workload, before normalization.
/// `filter`, `sort` and `projection` are JSON documents whose key order is
/// preserved.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawQuery {
    pub operation: OperationType,
    pub namespace: Option<String>,
    pub filter: JsonValue,
    pub sort: Option<JsonValue>,
    pub projection: Option<JsonValue>,
    pub limit: Option<i64>,
}

impl RawQuery {
    pub fn find(filter: JsonValue) -> Self {
        Self {
            operation: OperationType::Query,
            filter,
            ..Default::default()
        }
    }

    pub fn with_operation(mut self, operation: OperationType) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_sort(mut self, sort: JsonValue) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_projection(mut self, projection: JsonValue) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Produces the logged operations for one namespace. Iterated once per run.
pub trait WorkloadSource {
    type Queries: Iterator<Item = std::result::Result<RawQuery, SourceError>>;

    /// Open the workload. An error here means the source is unreachable.
    fn open(self, namespace: &str) -> std::result::Result<Self::Queries, SourceError>;
}

/// Count access to the document sample.
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Number of documents in the sample
    async fn total_count(&self) -> std::result::Result<u64, SourceError>;

    /// Number of sampled documents matching every predicate of `conjunction`
    async fn count_matching(&self, conjunction: &Conjunction) -> std::result::Result<u64, SourceError>;

    /// Size of the collection the sample was drawn from, if known
    async fn collection_count(&self) -> std::result::Result<Option<u64>, SourceError> {
        Ok(None)
    }
}

#[async_trait]
impl<S: SampleSource + ?Sized> SampleSource for Arc<S> {
    async fn total_count(&self) -> std::result::Result<u64, SourceError> {
        (**self).total_count().await
    }

    async fn count_matching(&self, conjunction: &Conjunction) -> std::result::Result<u64, SourceError> {
        (**self).count_matching(conjunction).await
    }

    async fn collection_count(&self) -> std::result::Result<Option<u64>, SourceError> {
        (**self).collection_count().await
    }
}

/// Receives the final ranked recommendations.
pub trait ResultSink {
    fn accept(&mut self, report: &AdvisorReport) -> crate::Result<()>;
}
