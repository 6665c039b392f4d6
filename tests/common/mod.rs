#![allow(dead_code)]

use async_trait::async_trait;
use index_advisor::{Conjunction, InMemorySample, RawQuery, SampleSource, SourceError};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// 1000 people: exactly one named "bob", 400 older than 30.
pub fn people_sample() -> InMemorySample {
    let docs = (0..1000).map(|i| {
        let name = if i == 0 { "bob".to_string() } else { format!("user{i}") };
        let age = if i < 400 { 31 + i % 50 } else { 20 + i % 10 };
        let city = ["Oslo", "Bergen", "Tromso"][i % 3];
        json!({"name": name, "age": age, "city": city})
    });
    InMemorySample::from_documents(docs)
}

pub fn find(filter: JsonValue) -> RawQuery {
    RawQuery::find(filter)
}

pub fn repeat(query: RawQuery, times: usize) -> Vec<RawQuery> {
    std::iter::repeat(query).take(times).collect()
}

/// Sample wrapper that fails or stalls on chosen filters
pub struct FaultySample {
    pub inner: InMemorySample,
    pub failures: HashMap<String, SourceError>,
    pub total_failure: Option<SourceError>,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl FaultySample {
    pub fn new(inner: InMemorySample) -> Self {
        Self {
            inner,
            failures: HashMap::new(),
            total_failure: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, filter: JsonValue, error: SourceError) -> Self {
        self.failures.insert(filter.to_string(), error);
        self
    }

    pub fn failing_total(mut self, error: SourceError) -> Self {
        self.total_failure = Some(error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SampleSource for FaultySample {
    async fn total_count(&self) -> Result<u64, SourceError> {
        if let Some(err) = &self.total_failure {
            return Err(err.clone());
        }
        self.inner.total_count().await
    }

    async fn count_matching(&self, conjunction: &Conjunction) -> Result<u64, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.get(&conjunction.cache_key()) {
            return Err(err.clone());
        }
        self.inner.count_matching(conjunction).await
    }
}
