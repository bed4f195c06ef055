use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tailslo_client::StreamingClient;
use tailslo_common::{Clock, RequestRecord, Result, SystemClock, TailSloError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

use crate::config::ReplayConfig;

/// A scheduled request that produced no record.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFailure {
    pub req_id: u64,
    pub error: TailSloError,
}

/// Everything a replay produced. Both lists are sorted by request id.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    /// Clock reading taken at the run's origin; request `i` is due at `origin_ts + schedule[i]`.
    pub origin_ts: f64,
    pub records: Vec<RequestRecord>,
    pub failures: Vec<RequestFailure>,
}

impl ReplayOutcome {
    pub fn attempted(&self) -> usize {
        self.records.len() + self.failures.len()
    }
}

/// Replays an arrival schedule against the service with bounded concurrency.
pub struct ReplayEngine {
    client: Arc<StreamingClient>,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
    concurrency: usize,
}

impl ReplayEngine {
    /// Returns `InvalidSchedule` if `config.concurrency` is zero.
    pub fn new(client: StreamingClient, config: ReplayConfig) -> Result<Self> {
        if config.concurrency == 0 {
            return Err(TailSloError::InvalidSchedule("concurrency must be at least 1".to_string()));
        }
        Ok(Self {
            client: Arc::new(client),
            http: reqwest::Client::new(),
            clock: Arc::new(SystemClock::new()),
            concurrency: config.concurrency,
        })
    }

    /// Share a preconfigured connection pool across all requests of the run.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Dispatch one request per schedule offset and wait for all of them.
    ///
    /// Request `i` sleeps until `t0 + schedule[i]`, then waits for a concurrency slot.
    /// Requests that fall behind are sent as soon as a slot frees up. Per-request
    /// errors are collected in [`ReplayOutcome::failures`] and never stop the run.
    pub async fn replay(&self, schedule: &[f64], payload: &Value) -> Result<ReplayOutcome> {
        let origin_ts = self.clock.now_s();
        let t0 = Instant::now();
        let deadlines = schedule
            .iter()
            .map(|&offset| deadline_after(t0, offset))
            .collect::<Result<Vec<_>>>()?;

        info!(requests = schedule.len(), concurrency = self.concurrency, "replay starting");

        let payload = Arc::new(payload.clone());
        let slots = Arc::new(Semaphore::new(self.concurrency));

        let mut tasks = JoinSet::new();
        let mut task_ids = HashMap::with_capacity(schedule.len());
        for (i, deadline) in deadlines.into_iter().enumerate() {
            let req_id = i as u64;
            let client = self.client.clone();
            let http = self.http.clone();
            let clock = self.clock.clone();
            let payload = payload.clone();
            let slots = slots.clone();

            let handle = tasks.spawn(async move {
                sleep_until(deadline).await;
                match slots.acquire().await {
                    Ok(_slot) => client.generate_stream(req_id, &payload, &http, clock.as_ref()).await,
                    Err(e) => Err(TailSloError::NetworkError(format!("concurrency pool closed: {e}"))),
                }
            });
            task_ids.insert(handle.id(), req_id);
        }

        let mut records = Vec::with_capacity(schedule.len());
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            let (req_id, result) = match joined {
                Ok((id, result)) => (task_ids[&id], result),
                Err(e) => (task_ids[&e.id()], Err(TailSloError::TaskFailed(e.to_string()))),
            };
            match result {
                Ok(record) => {
                    debug_assert!(
                        record.ttft_s() >= 0.0 && record.ttft_s() <= record.e2e_s(),
                        "inconsistent timestamps for request {}",
                        record.req_id
                    );
                    records.push(record);
                }
                Err(error) => {
                    warn!(req_id, %error, "request failed");
                    failures.push(RequestFailure { req_id, error });
                }
            }
        }

        records.sort_by_key(|r| r.req_id);
        failures.sort_by_key(|f| f.req_id);

        info!(completed = records.len(), failed = failures.len(), "replay finished");
        Ok(ReplayOutcome { origin_ts, records, failures })
    }
}

/// Absolute dispatch time of an offset, or `InvalidSchedule` if it cannot be represented.
fn deadline_after(t0: Instant, offset: f64) -> Result<Instant> {
    if !offset.is_finite() || offset < 0.0 {
        return Err(TailSloError::InvalidSchedule(format!("offset {offset} is not a non-negative number")));
    }
    Duration::try_from_secs_f64(offset)
        .ok()
        .and_then(|d| t0.checked_add(d))
        .ok_or_else(|| TailSloError::InvalidSchedule(format!("offset {offset}s is too far in the future")))
}
