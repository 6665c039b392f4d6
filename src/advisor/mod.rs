//! Index Advisor
//!
//! Reads a logged workload, reduces it to distinct query shapes, proposes
//! compound indexes for them and ranks the proposals by how much of the
//! workload they serve and how selective they are on a document sample.
//!
//! The pipeline runs in fixed stages: normalize, aggregate, generate,
//! estimate, score. Only estimation is concurrent.

pub mod candidates;
pub mod normalizer;
pub mod scoring;
pub mod selectivity;
pub mod workload;

pub use candidates::CandidateGenerator;
pub use normalizer::{normalize, UnsupportedQuery, UnsupportedReason};
pub use scoring::{Ranking, Scorer};
pub use selectivity::SelectivityEstimator;
pub use workload::{aggregate, ShapeSignature, WorkloadAggregator, WorkloadEntry};

use crate::config::AdvisorConfig;
use crate::error::{Error, Result, SourceError};
use crate::model::IndexCandidate;
use crate::sources::{ResultSink, SampleSource, WorkloadSource};
use crate::utils::CancellationToken;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Non-fatal conditions worth surfacing next to the recommendations
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdvisorWarning {
    /// The sample holds no documents; ranking reflects frequency only
    EmptySample,
    /// Logged queries that could not be modelled
    SkippedQueries { count: u64 },
    /// Workload records that could not be read
    UnreadableRecords { count: u64 },
    /// Prefix estimates that fell back to worst case
    UnknownEstimates { count: usize },
}

/// Counters for one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub namespace: String,
    /// Records read from the workload source
    pub total_records: u64,
    /// Records normalized into a query
    pub supported: u64,
    /// Skipped queries per reason
    pub skipped: BTreeMap<String, u64>,
    pub malformed_records: u64,
    pub failed_records: u64,
    /// Distinct query shapes
    pub entries: usize,
    pub candidates_generated: usize,
    pub pruned: usize,
    pub truncated: usize,
    pub sample_size: u64,
    pub unknown_estimates: usize,
    pub duration_ms: u64,
    pub warnings: Vec<AdvisorWarning>,
}

impl RunSummary {
    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }
}

/// One ranked index proposal
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    /// 1-based position in the ranking
    pub rank: usize,
    pub index_name: String,
    /// Key document for `createIndexes`
    pub key: JsonValue,
    #[serde(flatten)]
    pub candidate: IndexCandidate,
}

/// A workload shape as reported back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct ShapeSummary {
    pub id: usize,
    pub shape: String,
    pub frequency: u64,
}

/// Result of one advisory run
#[derive(Debug, Clone, Serialize)]
pub struct AdvisorReport {
    pub recommendations: Vec<Recommendation>,
    pub workload: Vec<ShapeSummary>,
    pub summary: RunSummary,
}

/// Runs the advisory pipeline against one sample source
pub struct IndexAdvisor<S> {
    config: AdvisorConfig,
    estimator: SelectivityEstimator<S>,
    generator: CandidateGenerator,
    scorer: Scorer,
}

impl<S: SampleSource + 'static> IndexAdvisor<S> {
    /// Create an advisor. The configuration is validated here.
    pub fn new(config: AdvisorConfig, sample: Arc<S>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            estimator: SelectivityEstimator::new(sample, config.max_concurrency),
            generator: CandidateGenerator::new(config.include_single_field),
            scorer: Scorer::new(config.scoring.clone()),
            config,
        })
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    /// Produce ranked recommendations for `namespace`.
    ///
    /// Cancelling `cancel` (or reaching the configured run timeout) aborts
    /// the run; no partial list is returned. The run timeout only cancels
    /// this run, never `cancel` itself.
    pub async fn recommend<W>(
        &self,
        workload: W,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<AdvisorReport>
    where
        W: WorkloadSource + Send + 'static,
    {
        let run_cancel = cancel.child_token();
        let deadline = self
            .config
            .run_timeout()
            .map(|timeout| (timeout, run_cancel.cancel_after(timeout)));

        let result = self.run_stages(workload, namespace, &run_cancel).await;

        let mut timed_out = None;
        if let Some((timeout, timer)) = deadline {
            timer.abort();
            if matches!(timer.await, Ok(true)) {
                timed_out = Some(timeout);
            }
        }
        // Releases the link to the caller's token.
        run_cancel.cancel();

        match (result, timed_out) {
            (Err(Error::Cancelled), Some(timeout)) if !cancel.is_cancelled() => Err(Error::Timeout(
                format!("advisory run exceeded {} ms", timeout.as_millis()),
            )),
            (result, _) => result,
        }
    }

    /// Like [`recommend`](Self::recommend), then hand the report to `sink`.
    pub async fn run<W, K>(
        &self,
        workload: W,
        namespace: &str,
        cancel: &CancellationToken,
        sink: &mut K,
    ) -> Result<AdvisorReport>
    where
        W: WorkloadSource + Send + 'static,
        K: ResultSink + ?Sized,
    {
        let report = self.recommend(workload, namespace, cancel).await?;
        sink.accept(&report)?;
        Ok(report)
    }

    async fn run_stages<W: WorkloadSource + Send + 'static>(
        &self,
        workload: W,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<AdvisorReport> {
        let start = Instant::now();
        info!(namespace, "Starting index advisory run");

        let summary = RunSummary {
            namespace: namespace.to_string(),
            ..Default::default()
        };
        let max_representatives = self.config.max_representatives;
        let reader_cancel = cancel.clone();
        let (entries, mut summary) = tokio::task::spawn_blocking(move || {
            read_workload(workload, max_representatives, &reader_cancel, summary)
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))??;
        summary.entries = entries.len();

        let mut candidates = self.generator.generate(&entries);
        summary.candidates_generated = candidates.len();

        let statistics = self.estimator.estimate(&mut candidates, &entries, cancel).await?;
        summary.sample_size = statistics.sample_size();
        summary.unknown_estimates = statistics.unknown_count();

        let ranking = self.scorer.rank(candidates, self.config.max_recommendations);
        summary.pruned = ranking.pruned;
        summary.truncated = ranking.truncated;

        if statistics.size_known() && summary.sample_size == 0 {
            summary.warnings.push(AdvisorWarning::EmptySample);
        } else if summary.unknown_estimates > 0 {
            summary.warnings.push(AdvisorWarning::UnknownEstimates {
                count: summary.unknown_estimates,
            });
        }
        if summary.skipped_total() > 0 {
            summary.warnings.push(AdvisorWarning::SkippedQueries {
                count: summary.skipped_total(),
            });
        }
        let unreadable = summary.malformed_records + summary.failed_records;
        if unreadable > 0 {
            summary.warnings.push(AdvisorWarning::UnreadableRecords { count: unreadable });
        }
        summary.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            namespace,
            supported = summary.supported,
            skipped = summary.skipped_total(),
            shapes = summary.entries,
            candidates = summary.candidates_generated,
            recommendations = ranking.recommendations.len(),
            duration_ms = summary.duration_ms,
            "Index advisory run complete"
        );

        let recommendations = ranking
            .recommendations
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| Recommendation {
                rank: i + 1,
                index_name: candidate.index_name(),
                key: candidate.key_document(),
                candidate,
            })
            .collect();
        let workload = entries
            .iter()
            .map(|e| ShapeSummary {
                id: e.id,
                shape: e.signature.to_string(),
                frequency: e.frequency,
            })
            .collect();

        Ok(AdvisorReport {
            recommendations,
            workload,
            summary,
        })
    }
}

/// Normalize and aggregate the workload. Unsupported queries and
/// unreadable records are counted; an unavailable source aborts. Runs on the
/// blocking pool since sources may read files.
fn read_workload<W: WorkloadSource>(
    workload: W,
    max_representatives: usize,
    cancel: &CancellationToken,
    mut summary: RunSummary,
) -> Result<(Vec<WorkloadEntry>, RunSummary)> {
    let queries = workload.open(&summary.namespace)?;
    let mut aggregator = WorkloadAggregator::new(max_representatives);

    for item in queries {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        summary.total_records += 1;
        match item {
            Ok(raw) => match normalize(&raw) {
                Ok(query) => {
                    aggregator.add(query);
                    summary.supported += 1;
                }
                Err(unsupported) => {
                    debug!(reason = %unsupported.reason, "Skipping query");
                    *summary
                        .skipped
                        .entry(unsupported.reason.kind().to_string())
                        .or_default() += 1;
                }
            },
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(SourceError::Malformed(msg)) => {
                warn!(record = summary.total_records, error = %msg, "Skipping malformed workload record");
                summary.malformed_records += 1;
            }
            Err(err) => {
                warn!(record = summary.total_records, error = %err, "Skipping unreadable workload record");
                summary.failed_records += 1;
            }
        }
    }

    debug!(
        records = summary.total_records,
        supported = summary.supported,
        shapes = aggregator.len(),
        "Aggregated workload"
    );
    Ok((aggregator.into_entries(), summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{InMemorySample, RawQuery, VecSink, VecWorkload};
    use serde_json::json;

    fn sample() -> Arc<InMemorySample> {
        let docs = (0..20)
            .map(|i| json!({"a": i % 4, "b": i, "c": format!("c{i}")}))
            .collect::<Vec<_>>();
        Arc::new(InMemorySample::from_documents(docs))
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = AdvisorConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(IndexAdvisor::new(config, sample()), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_report_and_sink() {
        let advisor = IndexAdvisor::new(AdvisorConfig::default(), sample()).unwrap();
        let workload = VecWorkload::new(vec![
            RawQuery::find(json!({"a": 1, "b": {"$gt": 5}})).with_sort(json!({"c": 1})),
            RawQuery::find(json!({"$or": [{"a": 1}, {"b": 2}]})),
        ]);
        let mut sink = VecSink::default();

        let report = advisor
            .run(workload, "test.coll", &CancellationToken::new(), &mut sink)
            .await
            .unwrap();

        assert_eq!(report.summary.supported, 1);
        assert_eq!(report.summary.skipped.get("disjunction"), Some(&1));
        assert_eq!(report.summary.sample_size, 20);
        assert_eq!(report.recommendations[0].rank, 1);
        assert!(report
            .summary
            .warnings
            .contains(&AdvisorWarning::SkippedQueries { count: 1 }));
        assert_eq!(sink.reports().len(), 1);
    }

    /// Records the thread that opened it
    struct ThreadRecordingWorkload {
        opened_on: Arc<std::sync::Mutex<Option<std::thread::ThreadId>>>,
    }

    impl WorkloadSource for ThreadRecordingWorkload {
        type Queries = std::vec::IntoIter<std::result::Result<RawQuery, SourceError>>;

        fn open(self, _namespace: &str) -> std::result::Result<Self::Queries, SourceError> {
            *self.opened_on.lock().unwrap() = Some(std::thread::current().id());
            Ok(vec![Ok(RawQuery::find(json!({"a": 1})))].into_iter())
        }
    }

    #[tokio::test]
    async fn test_workload_is_read_off_the_async_thread() {
        let advisor = IndexAdvisor::new(AdvisorConfig::default(), sample()).unwrap();
        let opened_on = Arc::new(std::sync::Mutex::new(None));
        let workload = ThreadRecordingWorkload {
            opened_on: Arc::clone(&opened_on),
        };

        let report = advisor
            .recommend(workload, "test.coll", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.summary.supported, 1);
        let reader = opened_on.lock().unwrap().expect("workload opened");
        assert_ne!(reader, std::thread::current().id());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let advisor = IndexAdvisor::new(AdvisorConfig::default(), sample()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = advisor
            .recommend(VecWorkload::new(vec![RawQuery::find(json!({"a": 1}))]), "test.coll", &cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
