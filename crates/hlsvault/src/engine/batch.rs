use std::path::Path;

use chrono::Local;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::Engine;
use crate::DownloadError;
use crate::fs;
use crate::input::ContentItem;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineFailure {
    pub line_number: usize,
    pub data: String,
    pub error: String,
    pub timestamp: String,
}

/// Summary of one pass over a crawler list; written to the processing
/// errors file when any line failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InputSummary {
    pub total_records: usize,
    pub success_count: usize,
    pub error_count: usize,
    /// Jobs that ran but left a journal record
    pub journaled_count: usize,
    pub error_records: Vec<LineFailure>,
    pub timestamp: String,
}

impl Engine {
    pub async fn process_input(
        &self,
        path: &Path,
        credential: Option<&str>,
    ) -> Result<InputSummary, DownloadError> {
        self.process_input_with_cancel(path, credential, &CancellationToken::new())
            .await
    }

    /// Run every record of the list sequentially. A bad line is recorded and
    /// skipped; it never stops the pass.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn process_input_with_cancel(
        &self,
        path: &Path,
        credential: Option<&str>,
        token: &CancellationToken,
    ) -> Result<InputSummary, DownloadError> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut lines = content.lines().enumerate();
        if let Some((_, header)) = lines.next() {
            info!(header, "Reading input list");
        }

        let mut summary = InputSummary::default();
        for (i, line) in lines {
            let line_number = i + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if token.is_cancelled() {
                warn!(line_number, "Input processing cancelled");
                break;
            }
            summary.total_records += 1;
            info!(line_number, "Processing record");

            let outcome = match ContentItem::parse(line) {
                Ok(item) => self
                    .run_with_cancel(item.into_job(credential), token)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(report) => {
                    summary.success_count += 1;
                    if report.journaled {
                        summary.journaled_count += 1;
                    }
                }
                Err(e) => {
                    error!(line_number, error = %e, "Record failed");
                    summary.error_count += 1;
                    summary.error_records.push(LineFailure {
                        line_number,
                        data: line.to_owned(),
                        error: e,
                        timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
                    });
                }
            }
        }
        summary.timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();

        if !summary.error_records.is_empty() {
            let errors_path = self.config.storage.processing_errors_path();
            let json = serde_json::to_vec_pretty(&summary)?;
            fs::write_atomic(&errors_path, json).await?;
            info!(path = %errors_path.display(), "Processing errors saved");
        }

        info!(
            total = summary.total_records,
            succeeded = summary.success_count,
            failed = summary.error_count,
            journaled = summary.journaled_count,
            "Input list processed"
        );
        Ok(summary)
    }
}
