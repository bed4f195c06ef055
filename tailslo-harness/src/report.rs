use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tailslo_common::{Completion, RequestRecord, Result, TailSloError};

use crate::metrics::{Summary, WindowPoint};

/// One line of the raw results file.
#[derive(Serialize)]
struct RecordLine {
    req_id: u64,
    send_ts: f64,
    first_ts: f64,
    last_ts: f64,
    ttft_s: f64,
    e2e_s: f64,
    completion: Completion,
}

impl From<&RequestRecord> for RecordLine {
    fn from(r: &RequestRecord) -> Self {
        Self {
            req_id: r.req_id,
            send_ts: r.send_ts,
            first_ts: r.first_ts,
            last_ts: r.last_ts,
            ttft_s: r.ttft_s(),
            e2e_s: r.e2e_s(),
            completion: r.completion,
        }
    }
}

/// Files written for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportPaths {
    pub raw: PathBuf,
    pub summary: PathBuf,
    pub series: Option<PathBuf>,
}

fn json_error(e: serde_json::Error) -> TailSloError {
    TailSloError::Io(e.to_string())
}

/// Write one JSON object per record, one per line.
pub fn write_jsonl(path: &Path, records: &[RequestRecord]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for r in records {
        serde_json::to_writer(&mut out, &RecordLine::from(r)).map_err(json_error)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, value).map_err(json_error)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

/// Persist raw records, the summary and (for burst runs) the time series under `outdir`.
pub fn save_run(
    outdir: &Path,
    tag: &str,
    records: &[RequestRecord],
    summary: &Summary,
    series: Option<&[WindowPoint]>,
) -> Result<ReportPaths> {
    fs::create_dir_all(outdir)?;

    let raw = outdir.join(format!("{tag}.jsonl"));
    write_jsonl(&raw, records)?;

    let summary_path = outdir.join(format!("{tag}.summary.json"));
    write_json_pretty(&summary_path, summary)?;

    let series_path = match series {
        Some(points) => {
            let path = outdir.join(format!("{tag}.series.json"));
            write_json_pretty(&path, points)?;
            Some(path)
        }
        None => None,
    };

    Ok(ReportPaths { raw, summary: summary_path, series: series_path })
}
