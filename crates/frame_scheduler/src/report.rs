use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameSkipReason {
    ShadersCompiling,
    NoPendingRequests,
    AllocationExhausted,
    SceneNotReady,
}

/// What one `finalize` did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameReport {
    pub frame_number: u64,
    pub skipped: Option<FrameSkipReason>,
    pub uploaded: usize,
    pub scheduled: usize,
    pub newly_mapped: usize,
    pub evicted: usize,
    pub dropped_by_allocation: usize,
    pub invalidated: usize,
    pub lod_index: Option<u32>,
    pub gi_tile_passes: usize,
    pub shadow_tile_passes: usize,
    pub transferred: usize,
    pub composed: usize,
    pub readbacks_issued: usize,
}

/// Appends `report` as one JSON line, for bake logs that are diffed between runs.
pub fn write_frame_report_line(
    writer: &mut dyn Write,
    report: &FrameReport,
) -> Result<(), std::io::Error> {
    serde_json::to_writer(&mut *writer, report).map_err(|error| {
        std::io::Error::other(format!("serialize frame report as JSON failed: {error}"))
    })?;
    writer.write_all(b"\n")
}

pub fn read_frame_reports(reader: &mut dyn BufRead) -> Result<Vec<FrameReport>, std::io::Error> {
    let mut reports = Vec::new();
    let mut line_buffer = String::new();
    let mut line_number = 0usize;
    loop {
        line_buffer.clear();
        if reader.read_line(&mut line_buffer)? == 0 {
            break;
        }
        line_number += 1;
        if line_buffer.trim().is_empty() {
            continue;
        }
        let report = serde_json::from_str::<FrameReport>(&line_buffer).map_err(|error| {
            std::io::Error::other(format!(
                "parse frame report JSON at line {line_number} failed: {error}"
            ))
        })?;
        reports.push(report);
    }
    Ok(reports)
}
