use serde::Serialize;
use tailslo_common::{RequestRecord, Result, TailSloError};

/// Linear-interpolation percentile (`p` in 0..=100) of `values`, in any order.
/// Returns NaN for an empty slice.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Fraction of `e2e` latencies strictly above `slo_s`; NaN for an empty slice.
pub fn violation_rate(e2e: &[f64], slo_s: f64) -> f64 {
    if e2e.is_empty() {
        return f64::NAN;
    }
    e2e.iter().filter(|&&v| v > slo_s).count() as f64 / e2e.len() as f64
}

/// Distribution of a whole run against an SLO. NaN fields serialize as `null`.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub n: usize,
    pub slo_s: f64,
    pub viol_rate: f64,

    pub ttft_p50: f64,
    pub ttft_p90: f64,
    pub ttft_p99: f64,

    pub e2e_p50: f64,
    pub e2e_p90: f64,
    pub e2e_p99: f64,
}

pub fn summarize(records: &[RequestRecord], slo_s: f64) -> Summary {
    let ttft: Vec<f64> = records.iter().map(RequestRecord::ttft_s).collect();
    let e2e: Vec<f64> = records.iter().map(RequestRecord::e2e_s).collect();

    Summary {
        n: records.len(),
        slo_s,
        viol_rate: violation_rate(&e2e, slo_s),

        ttft_p50: percentile(&ttft, 50.0),
        ttft_p90: percentile(&ttft, 90.0),
        ttft_p99: percentile(&ttft, 99.0),

        e2e_p50: percentile(&e2e, 50.0),
        e2e_p90: percentile(&e2e, 90.0),
        e2e_p99: percentile(&e2e, 99.0),
    }
}

/// Statistics of the records that completed inside one time bucket.
#[derive(Debug, Clone, Serialize)]
pub struct WindowPoint {
    /// End of the bucket, in seconds after the earliest send.
    pub t_end: f64,
    pub n: usize,
    pub e2e_p99: f64,
    pub viol_rate: f64,
}

/// Bucket records by completion time into `window_s`-wide windows starting at the
/// earliest `send_ts`. Every window up to the one holding the latest completion is
/// present, empty ones with `n = 0` and NaN statistics.
pub fn window_series(records: &[RequestRecord], slo_s: f64, window_s: f64) -> Result<Vec<WindowPoint>> {
    if !window_s.is_finite() || window_s <= 0.0 {
        return Err(TailSloError::InvalidWindow(window_s));
    }
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let t0 = records.iter().map(|r| r.send_ts).fold(f64::INFINITY, f64::min);
    let t_max = records.iter().map(|r| r.last_ts).fold(f64::NEG_INFINITY, f64::max);
    let num_win = (((t_max - t0) / window_s).ceil() as usize).max(1);

    let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); num_win];
    for r in records {
        // Clamp absorbs float error at the last boundary.
        let idx = ((r.last_ts - t0) / window_s).floor().max(0.0) as usize;
        buckets[idx.min(num_win - 1)].push(r.e2e_s());
    }

    Ok(buckets
        .iter()
        .enumerate()
        .map(|(i, e2e)| WindowPoint {
            t_end: (i + 1) as f64 * window_s,
            n: e2e.len(),
            e2e_p99: percentile(e2e, 99.0),
            viol_rate: violation_rate(e2e, slo_s),
        })
        .collect())
}
