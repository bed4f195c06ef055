use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Prefix of a frame that carries a content chunk.
pub const DATA_PREFIX: &str = "data:";

/// Payload of the data frame that terminates a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Error types for schedule generation, streaming requests and aggregation
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum TailSloError {
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("HTTP {0}: {1}")]
    HttpError(u16, String),

    #[error("Request timed out")]
    Timeout,

    /// The response started but the transport failed before the stream closed cleanly.
    #[error("Stream aborted: {0}")]
    StreamAborted(String),

    #[error("Window width must be positive and finite, got {0}")]
    InvalidWindow(f64),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Failed to launch service: {0}")]
    Launch(String),

    #[error("Service not ready: {0}")]
    NotReady(String),

    /// A request's task panicked or was cancelled before it produced a result.
    #[error("Request task failed: {0}")]
    TaskFailed(String),
}

impl From<std::io::Error> for TailSloError {
    fn from(e: std::io::Error) -> Self {
        TailSloError::Io(e.to_string())
    }
}

/// JSON error envelope returned by the stub service for error responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Result type for tailslo operations
pub type Result<T> = std::result::Result<T, TailSloError>;

/// How a successfully consumed stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// The terminal sentinel frame was observed.
    Sentinel,
    /// The server closed the body cleanly without sending the sentinel.
    Eof,
}

/// Timing of one dispatched request. All timestamps are seconds on the run's [`Clock`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub req_id: u64,
    pub send_ts: f64,
    /// Equals `last_ts` when no data frame was observed.
    pub first_ts: f64,
    pub last_ts: f64,
    pub completion: Completion,
}

impl RequestRecord {
    /// Time to first token, in seconds.
    pub fn ttft_s(&self) -> f64 {
        self.first_ts - self.send_ts
    }

    /// End-to-end latency, in seconds.
    pub fn e2e_s(&self) -> f64 {
        self.last_ts - self.send_ts
    }
}

/// Abstraction over current time for testability.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now_s(&self) -> f64;
}

/// Production clock: wall-clock anchored once, advanced by the monotonic clock.
///
/// Readings never go backwards even if the system time is adjusted mid-run, so
/// derived latencies cannot turn negative.
pub struct SystemClock {
    wall_anchor_s: f64,
    mono_anchor: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let wall_anchor_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Self { wall_anchor_s, mono_anchor: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_s(&self) -> f64 {
        self.wall_anchor_s + self.mono_anchor.elapsed().as_secs_f64()
    }
}
