//! Selectivity Estimator
//!
//! Counts, against the document sample, how many documents each candidate
//! prefix would match for the workload's own predicates. Counting requests
//! run on a bounded tokio task pool; their outcomes are merged on the calling
//! task in job order, so the resulting statistics do not depend on completion
//! order.

use super::workload::WorkloadEntry;
use crate::error::{Error, Result, SourceError};
use crate::model::{
    Conjunction, EstimationUnknown, IndexCandidate, Predicate, PrefixEstimate, SampleStatistics,
};
use crate::sources::SampleSource;
use crate::utils::CancellationToken;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

type CountOutcome = std::result::Result<u64, SourceError>;

/// How one prefix is answered
enum PrefixPlan {
    /// Contains a field that never occurs in the sample
    Absent(String),
    /// Largest count over these jobs; `all` when some conjunction binds no
    /// predicate and therefore matches the whole sample
    Jobs { jobs: Vec<usize>, all: bool },
}

/// Deduplicated list of counting requests
#[derive(Default)]
struct JobTable {
    conjunctions: Vec<Conjunction>,
    index: HashMap<String, usize>,
}

impl JobTable {
    fn intern(&mut self, conjunction: Conjunction) -> usize {
        let key = conjunction.cache_key();
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.conjunctions.len();
        self.index.insert(key, id);
        self.conjunctions.push(conjunction);
        id
    }

    fn len(&self) -> usize {
        self.conjunctions.len()
    }
}

pub struct SelectivityEstimator<S> {
    source: Arc<S>,
    max_concurrency: usize,
}

impl<S: SampleSource + 'static> SelectivityEstimator<S> {
    pub fn new(source: Arc<S>, max_concurrency: usize) -> Self {
        Self {
            source,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Estimate every prefix of every candidate and write the resulting
    /// selectivities back into `candidates`.
    ///
    /// Returns the per-prefix statistics. Fails only on cancellation or when
    /// the sample source reports itself unavailable; any other counting
    /// failure degrades that prefix to worst case.
    pub async fn estimate(
        &self,
        candidates: &mut [IndexCandidate],
        entries: &[WorkloadEntry],
        cancel: &CancellationToken,
    ) -> Result<SampleStatistics> {
        let start = Instant::now();
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let total = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            total = self.source.total_count() => total,
        };
        let sample_size = match total {
            Ok(0) => {
                warn!("Sample is empty, every candidate is estimated as worst case");
                return Ok(worst_case(candidates, SampleStatistics::new(0), EstimationUnknown::EmptySample));
            }
            Ok(size) => size,
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => {
                warn!(error = %err, "Sample size unavailable, every candidate is estimated as worst case");
                return Ok(worst_case(
                    candidates,
                    SampleStatistics::unknown_size(),
                    EstimationUnknown::SourceFailure(err.to_string()),
                ));
            }
        };
        let mut statistics = SampleStatistics::new(sample_size);

        let by_id: HashMap<usize, &WorkloadEntry> = entries.iter().map(|e| (e.id, e)).collect();

        // Presence probes, one per predicate field in play
        let probe_fields: BTreeSet<&str> = candidates
            .iter()
            .flat_map(|c| c.contributing_entries.iter())
            .filter_map(|id| by_id.get(id))
            .flat_map(|e| e.representatives.iter())
            .flat_map(|q| q.predicates().iter().map(Predicate::field))
            .collect();
        let probe_fields: Vec<&str> = probe_fields.into_iter().collect();
        let probes = probe_fields
            .iter()
            .map(|field| Conjunction::new(vec![Predicate::exists(*field, true)]))
            .collect();
        let probe_outcomes = self.run_counts(probes, cancel).await?;
        let absent: BTreeSet<&str> = probe_fields
            .iter()
            .zip(&probe_outcomes)
            .filter(|(_, outcome)| matches!(outcome, Ok(0)))
            .map(|(field, _)| *field)
            .collect();
        if !absent.is_empty() {
            debug!(fields = ?absent, "Fields absent from the sample");
        }

        let mut table = JobTable::default();
        let mut plans: Vec<(usize, usize, PrefixPlan)> = Vec::new();
        for (id, candidate) in candidates.iter().enumerate() {
            for prefix_len in 1..=candidate.len() {
                let prefix = &candidate.fields[..prefix_len];
                if let Some(field) = prefix.iter().find(|f| absent.contains(f.as_str())) {
                    plans.push((id, prefix_len, PrefixPlan::Absent(field.clone())));
                    continue;
                }
                let mut jobs = Vec::new();
                let mut all = false;
                for entry in candidate.contributing_entries.iter().filter_map(|e| by_id.get(e)) {
                    for representative in &entry.representatives {
                        let conjunction = representative.bound_to(prefix);
                        if conjunction.is_empty() {
                            all = true;
                        } else {
                            jobs.push(table.intern(conjunction));
                        }
                    }
                }
                // A candidate with no contributing entries binds nothing either.
                let all = all || jobs.is_empty();
                plans.push((id, prefix_len, PrefixPlan::Jobs { jobs, all }));
            }
        }

        let issued = table.len();
        let outcomes = self.run_counts(table.conjunctions, cancel).await?;

        for (id, prefix_len, plan) in plans {
            let estimate = match plan {
                PrefixPlan::Absent(field) => PrefixEstimate::Unknown(EstimationUnknown::FieldAbsent(field)),
                PrefixPlan::Jobs { jobs, all } => merge_prefix(&jobs, all, &outcomes, sample_size),
            };
            statistics.record(id, prefix_len, estimate);
        }

        let collection_count = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            count = self.source.collection_count() => count,
        };
        let collection_count = match collection_count {
            Ok(count) => count,
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => {
                warn!(error = %err, "Collection size unavailable, skipping document estimates");
                None
            }
        };
        apply(candidates, &statistics, collection_count);

        info!(
            sample_size,
            probes = probe_fields.len(),
            queries = issued,
            unknown = statistics.unknown_count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Estimated candidate selectivity"
        );
        Ok(statistics)
    }

    /// Run counting requests on the bounded pool. The returned outcomes are
    /// in request order.
    async fn run_counts(
        &self,
        conjunctions: Vec<Conjunction>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CountOutcome>> {
        let total = conjunctions.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for (idx, conjunction) in conjunctions.into_iter().enumerate() {
            let source = Arc::clone(&self.source);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => source.count_matching(&conjunction).await,
                    Err(err) => Err(SourceError::Transient(err.to_string())),
                };
                (idx, outcome)
            });
        }

        let mut outcomes: Vec<Option<CountOutcome>> = (0..total).map(|_| None).collect();
        loop {
            let joined = tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    debug!(pending = tasks.len(), "Estimation cancelled");
                    return Err(Error::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            match joined {
                None => break,
                Some(Ok((_, Err(err)))) if err.is_fatal() => {
                    tasks.abort_all();
                    return Err(err.into());
                }
                Some(Ok((idx, outcome))) => {
                    if let Err(err) = &outcome {
                        warn!(error = %err, "Counting request failed, prefix treated as unknown");
                    }
                    outcomes[idx] = Some(outcome);
                }
                Some(Err(err)) => {
                    tasks.abort_all();
                    return Err(Error::Task(err.to_string()));
                }
            }
        }

        Ok(outcomes
            .into_iter()
            .map(|o| o.unwrap_or_else(|| Err(SourceError::Transient("no result".into()))))
            .collect())
    }
}

/// Record every prefix as unknown for `reason` without issuing any request.
fn worst_case(
    candidates: &mut [IndexCandidate],
    mut statistics: SampleStatistics,
    reason: EstimationUnknown,
) -> SampleStatistics {
    for (id, candidate) in candidates.iter().enumerate() {
        for prefix_len in 1..=candidate.len() {
            statistics.record(id, prefix_len, PrefixEstimate::Unknown(reason.clone()));
        }
    }
    apply(candidates, &statistics, None);
    statistics
}

/// Most conservative (largest) count over a prefix's conjunctions.
fn merge_prefix(jobs: &[usize], all: bool, outcomes: &[CountOutcome], sample_size: u64) -> PrefixEstimate {
    let mut matched = if all { sample_size } else { 0 };
    for &job in jobs {
        match &outcomes[job] {
            Ok(m) => matched = matched.max(*m),
            Err(err) => return PrefixEstimate::Unknown(EstimationUnknown::SourceFailure(err.to_string())),
        }
    }
    PrefixEstimate::Matched(matched)
}

fn apply(candidates: &mut [IndexCandidate], statistics: &SampleStatistics, collection_count: Option<u64>) {
    for (id, candidate) in candidates.iter_mut().enumerate() {
        candidate.prefix_selectivity = (1..=candidate.len())
            .map(|prefix_len| statistics.selectivity(id, prefix_len))
            .collect();
        candidate.selectivity = candidate.prefix_selectivity.last().copied().unwrap_or(1.0);
        candidate.estimated_documents =
            collection_count.map(|count| (candidate.selectivity * count as f64).round() as u64);
    }
}
