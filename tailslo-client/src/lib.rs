use serde_json::Value;
use std::time::Duration;
use tailslo_common::{
    Clock, Completion, ErrorResponse, RequestRecord, Result, TailSloError, DATA_PREFIX,
    DONE_SENTINEL,
};
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "/v1/chat/completions";

/// Streaming client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub endpoint: String,
    /// Applies to the whole request, from connect until the body is drained.
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    /// Configuration for `base_url` with the default endpoint and no timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: None,
        }
    }
}

/// One line of a streamed response, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<'a> {
    /// A `data:` line carrying a content chunk.
    Data(&'a str),
    /// The `data: [DONE]` terminal sentinel.
    Done,
    /// Comments, `event:`/`id:` fields, blank keep-alive lines.
    Ignored,
}

/// Classify a single line (without its trailing `\n`).
pub fn parse_frame(line: &str) -> Frame<'_> {
    let line = line.trim_end_matches('\r');
    match line.strip_prefix(DATA_PREFIX) {
        Some(rest) => {
            let data = rest.trim();
            if data == DONE_SENTINEL {
                Frame::Done
            } else {
                Frame::Data(data)
            }
        }
        None => Frame::Ignored,
    }
}

/// Reassembles newline-delimited lines from arbitrarily split body chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete line, if one has been fully received.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line[..pos]).into_owned())
    }

    /// Drain a trailing line that was not newline-terminated when the body closed.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Tracks first/last timestamps while frames are observed.
pub struct StreamTracker<'c> {
    clock: &'c dyn Clock,
    first_ts: Option<f64>,
    last_ts: Option<f64>,
}

impl<'c> StreamTracker<'c> {
    pub fn new(clock: &'c dyn Clock) -> Self {
        Self { clock, first_ts: None, last_ts: None }
    }

    /// Feed one line. Returns `true` once the terminal sentinel has been seen.
    pub fn observe(&mut self, line: &str) -> bool {
        if self.is_done() {
            return true;
        }
        match parse_frame(line) {
            Frame::Done => {
                self.last_ts = Some(self.clock.now_s());
                true
            }
            Frame::Data(_) => {
                let clock = self.clock;
                self.first_ts.get_or_insert_with(|| clock.now_s());
                false
            }
            Frame::Ignored => false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.last_ts.is_some()
    }

    /// Close out the stream. Missing `last_ts` defaults to now; missing `first_ts` to `last_ts`.
    pub fn finish(self, req_id: u64, send_ts: f64) -> RequestRecord {
        let (last_ts, completion) = match self.last_ts {
            Some(ts) => (ts, Completion::Sentinel),
            None => (self.clock.now_s(), Completion::Eof),
        };
        RequestRecord {
            req_id,
            send_ts,
            first_ts: self.first_ts.unwrap_or(last_ts),
            last_ts,
            completion,
        }
    }
}

/// Copy `payload` and force its `stream` flag on. The caller's value is left untouched.
pub fn streaming_payload(payload: &Value) -> Result<Value> {
    let mut body = payload.clone();
    let object = body
        .as_object_mut()
        .ok_or_else(|| TailSloError::InvalidPayload("payload must be a JSON object".to_string()))?;
    object.insert("stream".to_string(), Value::Bool(true));
    Ok(body)
}

/// Issues single streaming generation requests and measures their timing.
pub struct StreamingClient {
    pub config: ClientConfig,
    url: String,
}

impl StreamingClient {
    pub fn new(config: ClientConfig) -> Self {
        let url = format!("{}{}", config.base_url.trim_end_matches('/'), config.endpoint);
        Self { config, url }
    }

    /// Full URL requests are POSTed to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one streaming request over the caller's `http` client and return its timing.
    ///
    /// A non-success status, a connect failure, a timeout, or a transport error while
    /// reading the body is an `Err`. A body that closes cleanly without the sentinel
    /// still yields a record, tagged [`Completion::Eof`].
    pub async fn generate_stream(
        &self,
        req_id: u64,
        payload: &Value,
        http: &reqwest::Client,
        clock: &dyn Clock,
    ) -> Result<RequestRecord> {
        let body = streaming_payload(payload)?;

        let mut request = http.post(&self.url).json(&body);
        if let Some(timeout) = self.config.timeout {
            request = request.timeout(timeout);
        }

        let send_ts = clock.now_s();
        let mut response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TailSloError::Timeout
            } else {
                TailSloError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(parse_error_response(status, response).await);
        }

        let mut tracker = StreamTracker::new(clock);
        let mut lines = LineBuffer::default();
        'read: loop {
            let chunk = response.chunk().await.map_err(|e| {
                if e.is_timeout() {
                    TailSloError::Timeout
                } else {
                    TailSloError::StreamAborted(e.to_string())
                }
            })?;
            let Some(chunk) = chunk else { break };
            lines.push(&chunk);
            while let Some(line) = lines.next_line() {
                if tracker.observe(&line) {
                    break 'read;
                }
            }
        }
        if !tracker.is_done() {
            if let Some(line) = lines.finish() {
                tracker.observe(&line);
            }
        }

        let record = tracker.finish(req_id, send_ts);
        debug!(
            req_id,
            ttft_s = record.ttft_s(),
            e2e_s = record.e2e_s(),
            completion = ?record.completion,
            "stream complete"
        );
        Ok(record)
    }
}

async fn parse_error_response(status: reqwest::StatusCode, response: reqwest::Response) -> TailSloError {
    let error_msg = response
        .json::<ErrorResponse>()
        .await
        .map(|r| r.error)
        .unwrap_or_else(|_| format!("Server returned status: {}", status));

    TailSloError::HttpError(status.as_u16(), error_msg)
}
