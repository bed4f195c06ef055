use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tailslo_common::{Result, TailSloError};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:30000";

/// Ceiling on requests in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 128;

pub const DEFAULT_SLO_S: f64 = 2.0;

/// Width of the buckets in burst-mode time series.
pub const DEFAULT_WINDOW_S: f64 = 1.0;

/// How long `launch` and `run --health-url` wait for the service to come up.
pub const READY_TIMEOUT: Duration = Duration::from_secs(180);

/// Timeout of a single readiness probe.
pub const READY_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Time between SIGTERM and SIGKILL when stopping a service.
pub const STOP_GRACE: Duration = Duration::from_secs(10);

pub const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Replay engine configuration
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub concurrency: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { concurrency: DEFAULT_CONCURRENCY }
    }
}

/// Per-request timeout from a seconds value; `None` means unlimited.
pub fn request_timeout(seconds: Option<f64>) -> Result<Option<Duration>> {
    let Some(s) = seconds else {
        return Ok(None);
    };
    if s <= 0.0 {
        return Err(TailSloError::InvalidSchedule(format!("timeout must be positive, got {s}")));
    }
    Duration::try_from_secs_f64(s)
        .map(Some)
        .map_err(|e| TailSloError::InvalidSchedule(format!("timeout {s}: {e}")))
}

/// Request body sent when no payload file is given.
pub fn default_payload() -> Value {
    json!({
        "messages": [{"role": "user", "content": "Explain MoE in one paragraph."}],
        "max_tokens": 128,
        "temperature": 0.0,
        "stream": true,
    })
}

/// Read a JSON payload template from `path`, or fall back to [`default_payload`].
pub fn load_payload(path: Option<&Path>) -> Result<Value> {
    let Some(path) = path else {
        return Ok(default_payload());
    };
    let text = std::fs::read_to_string(path)?;
    let payload: Value = serde_json::from_str(&text)
        .map_err(|e| TailSloError::InvalidPayload(format!("{}: {e}", path.display())))?;
    if !payload.is_object() {
        return Err(TailSloError::InvalidPayload(format!("{}: expected a JSON object", path.display())));
    }
    Ok(payload)
}
