//! Local cluster: broker, workers, results writer and dispatcher in one
//! process, each on its own task and talking only through named queues.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use ptdaf_common::{DafConfig, LocalBroker, MessageChannel, ModelContext, QueueName, Result};
use ptdaf_worker::{ResultsWriter, TravelModel, Worker, WorkerStats};

use crate::dispatcher::{Dispatcher, PipelineSummary};
use crate::population::Population;

/// Outcome of a local run
#[derive(Debug, Clone)]
pub struct ClusterReport {
    pub summary: PipelineSummary,
    /// One entry per worker that shut down cleanly, in queue order
    pub workers: Vec<WorkerStats>,
    /// Households the results writer received
    pub results_written: usize,
}

/// Run the whole pipeline on `work_queues` local workers.
///
/// Returns once the completion marker is written and every task has
/// stopped.
pub async fn run_local_cluster<M: TravelModel>(
    config: &DafConfig,
    context: Arc<ModelContext>,
    population: Population,
    model: Arc<M>,
) -> Result<ClusterReport> {
    config.validate()?;
    if config.queues.broadcast_queues < config.queues.work_queues {
        info!(
            "{} of {} workers receive zone data and serve the phases that need it",
            config.queues.broadcast_queues, config.queues.work_queues
        );
    }

    let broker = Arc::new(LocalBroker::new());
    let channel: Arc<dyn MessageChannel> = broker.clone();
    let master_inbox = broker.register(QueueName::master())?;
    let results_inbox = broker.register(QueueName::results_writer())?;

    let mut worker_handles = Vec::with_capacity(config.queues.work_queues);
    for index in 0..config.queues.work_queues {
        let inbox = broker.register(QueueName::work_queue(index))?;
        let worker = Worker::new(inbox, channel.clone(), model.clone(), context.clone());
        worker_handles.push(tokio::spawn(worker.run()));
    }
    info!("Started {} workers", worker_handles.len());

    let writer = ResultsWriter::create(
        results_inbox,
        channel.clone(),
        config.output.results_file.as_deref(),
    )
    .await?;
    let writer_handle = tokio::spawn(writer.run());

    let outcome = match Dispatcher::new(config, context, population, channel) {
        Ok(dispatcher) => dispatcher.run(master_inbox).await,
        Err(e) => Err(e),
    };

    // Closing every queue ends the worker and writer loops
    broker.close_all()?;

    let mut workers = Vec::with_capacity(worker_handles.len());
    for joined in join_all(worker_handles).await {
        match joined {
            Ok(stats) => workers.push(stats),
            Err(e) => warn!("Worker task ended abnormally: {}", e),
        }
    }

    let results_written = match writer_handle.await {
        Ok(Ok(households)) => households,
        Ok(Err(e)) => {
            warn!("Results writer failed: {}", e);
            0
        }
        Err(e) => {
            warn!("Results writer task ended abnormally: {}", e);
            0
        }
    };

    Ok(ClusterReport {
        summary: outcome?,
        workers,
        results_written,
    })
}
