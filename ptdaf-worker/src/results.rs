//! Terminal results consumer
//!
//! Collects processed households forwarded by the dispatcher, optionally
//! appends them to a JSON-lines file, and acknowledges `PIPELINE_DONE` with
//! `RESULTS_WRITTEN` once everything received so far is flushed.

use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use ptdaf_common::messages::Household;
use ptdaf_common::{Envelope, Inbox, MessageBody, MessageChannel, QueueName, Result};

/// Results writer bound to the results queue
pub struct ResultsWriter {
    queue: QueueName,
    inbox: Inbox,
    channel: Arc<dyn MessageChannel>,
    output: Option<File>,
    households: usize,
}

impl ResultsWriter {
    /// Create the writer, truncating `results_file` if one is given
    pub async fn create(
        inbox: Inbox,
        channel: Arc<dyn MessageChannel>,
        results_file: Option<&Path>,
    ) -> Result<Self> {
        let output = match results_file {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                info!("Writing household results to {}", path.display());
                Some(File::create(path).await?)
            }
            None => None,
        };

        Ok(Self {
            queue: inbox.name().clone(),
            inbox,
            channel,
            output,
            households: 0,
        })
    }

    /// Consume results until the queue closes; returns households written
    pub async fn run(mut self) -> Result<usize> {
        while let Some(received) = self.inbox.recv().await {
            let envelope = match received {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("Results writer discarding undecodable message: {}", e);
                    continue;
                }
            };

            match envelope.body {
                MessageBody::ResultsBatch { households } => {
                    self.write_batch(&households).await?;
                }
                MessageBody::PipelineDone { households } => {
                    self.flush().await?;
                    if households != self.households {
                        warn!(
                            "Dispatcher reported {} households, results writer received {}",
                            households, self.households
                        );
                    }
                    info!("All results written: {} households", self.households);
                    self.channel.send(
                        &envelope.sender,
                        Envelope::new(
                            self.queue.clone(),
                            MessageBody::ResultsWritten { households: self.households },
                        ),
                    )?;
                }
                other => {
                    warn!("Results writer discarding unexpected {} from {}", other.name(), envelope.sender);
                }
            }
        }

        Ok(self.households)
    }

    async fn write_batch(&mut self, households: &[Household]) -> Result<()> {
        self.households += households.len();
        debug!("Results batch of {} households ({} total)", households.len(), self.households);

        if let Some(file) = self.output.as_mut() {
            let mut lines = Vec::new();
            for household in households {
                serde_json::to_writer(&mut lines, household)?;
                lines.push(b'\n');
            }
            file.write_all(&lines).await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.output.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }
}
