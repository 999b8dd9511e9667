use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use crate::packet::PacketSummary;
use crate::parser::{Encoding, ParserOptions, parser_for};
use crate::session::SessionTracker;
use crate::source::{DissectionInput, SourceError};
use crate::timestamp::{ts_to_rfc3339, update_ts_bounds};
use crate::{CaptureSummary, DEFAULT_GENERATED_AT, DecodeError, Report, make_stub_report};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

/// Load `path` and analyse it; see [`analyze_input`].
pub fn analyze_file(
    path: &Path,
    encoding: Option<Encoding>,
    options: &ParserOptions,
) -> Result<Report, AnalysisError> {
    let input = DissectionInput::open(path, encoding)?;
    Ok(analyze_input(&path.display().to_string(), &input, options))
}

/// Decode every unit of `input` and build a report.
///
/// Units that fail to decode are listed in `decode_errors`; the rest are
/// summarised and fed through a session tracker.
pub fn analyze_input(label: &str, input: &DissectionInput, options: &ParserOptions) -> Report {
    let parser = parser_for(input.encoding, *options);
    let tracker = SessionTracker::new();
    let mut packets = Vec::new();
    let mut decode_errors = Vec::new();
    let mut first_ts = None;
    let mut last_ts = None;

    for result in parser.parse_units(&input.data) {
        match result {
            Ok(packet) => {
                update_ts_bounds(&mut first_ts, &mut last_ts, packet.sniff_timestamp().ok());
                packets.push(PacketSummary::from_packet(&packet));
                tracker.add_packet(packet);
            }
            Err(err) => {
                warn!(error = %err, "skipping undecodable unit");
                decode_errors.push(DecodeError {
                    unit: err.unit(),
                    message: err.to_string(),
                });
            }
        }
    }

    let mut report = make_stub_report(label, input.data.len() as u64, input.encoding);
    report.capture_summary = Some(CaptureSummary {
        packets_total: packets.len() as u64,
        time_start: ts_to_rfc3339(first_ts),
        time_end: ts_to_rfc3339(last_ts),
    });
    report.generated_at = report
        .capture_summary
        .as_ref()
        .and_then(|summary| summary.time_end.clone().or(summary.time_start.clone()))
        .unwrap_or_else(|| DEFAULT_GENERATED_AT.to_string());
    report.sessions = tracker.summaries();
    report.packets = packets;
    report.decode_errors = decode_errors;

    info!(
        packets = report.packets.len(),
        sessions = report.sessions.len(),
        errors = report.decode_errors.len(),
        "analysis complete"
    );
    report
}
