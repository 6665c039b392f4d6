//! Index advisor for MongoDB-style document collections.
//!
//! Given a log of executed queries and a sample of the collection's
//! documents, recommends compound indexes ranked by estimated benefit.
//!
//! ```no_run
//! use index_advisor::{AdvisorConfig, CancellationToken, IndexAdvisor, InMemorySample, JsonLinesWorkload};
//! use std::sync::Arc;
//!
//! # async fn demo() -> index_advisor::Result<()> {
//! let sample = Arc::new(InMemorySample::from_json_lines("sample.jsonl")?);
//! let advisor = IndexAdvisor::new(AdvisorConfig::default(), sample)?;
//! let report = advisor
//!     .recommend(JsonLinesWorkload::new("profile.jsonl"), "shop.orders", &CancellationToken::new())
//!     .await?;
//! for rec in &report.recommendations {
//!     println!("{} {}", rec.index_name, rec.candidate.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod advisor;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod sources;
pub mod utils;

pub use advisor::{
    AdvisorReport, AdvisorWarning, IndexAdvisor, Recommendation, RunSummary, UnsupportedQuery,
    UnsupportedReason,
};
pub use config::{AdvisorConfig, ScoringConfig};
pub use error::{Error, Result, SourceError};
pub use model::{Conjunction, IndexCandidate, Predicate, Query, Value};
pub use sources::{
    InMemorySample, JsonLinesWorkload, OutputFormat, RawQuery, ResultSink, SampleSource, VecSink,
    VecWorkload, WorkloadSource, WriterSink,
};
pub use utils::CancellationToken;
