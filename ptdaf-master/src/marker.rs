//! Completion marker written once the results writer has acknowledged

use chrono::Utc;
use std::path::Path;
use tracing::info;

use ptdaf_common::Result;

use crate::dispatcher::PipelineSummary;

/// Write the done file, creating parent directories as needed
pub fn write_completion_marker(path: &Path, summary: &PipelineSummary) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let phases: Vec<&str> = summary.phases_completed.iter().map(|p| p.as_str()).collect();
    let content = format!(
        "ptdaf is done. {}\n\
         phases_completed = {}\n\
         persons_located = {}\n\
         households_processed = {}\n\
         blocks_emitted = {}\n\
         refill_requests = {}\n\
         failed_replies = {}\n\
         discarded_messages = {}\n",
        Utc::now().to_rfc3339(),
        phases.join(","),
        summary.persons_located,
        summary.households_processed,
        summary.blocks_emitted,
        summary.refill_requests,
        summary.failed_replies,
        summary.discarded_messages
    );

    std::fs::write(path, content)?;
    info!("Completion marker written to {}", path.display());
    Ok(())
}
