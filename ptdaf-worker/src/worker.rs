//! Worker task bound to one work queue
//!
//! Receive loop: take the next message from the queue, run the phase-tagged
//! collaborator computation on the blocking pool, send exactly one reply to
//! the message's sender.
//!
//! A failing or panicking collaborator never drops the reply: the worker
//! answers with an empty or partial payload flagged `failed`, so the
//! dispatcher's reply counts stay in step with what it emitted.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use ptdaf_common::messages::{Block, Household, PhaseReply, PhaseTag, PhaseWork, ZoneData};
use ptdaf_common::{Envelope, Error, Inbox, MessageBody, MessageChannel, ModelContext, QueueName, Result};

use crate::model::TravelModel;

/// Counters reported when a worker stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Work messages answered
    pub replies_sent: usize,
    /// Replies that carried `failed = true`
    pub computation_failures: usize,
    /// Messages dropped as undecodable or unexpected
    pub discarded: usize,
}

/// Single-threaded executor for one queue
pub struct Worker<M> {
    queue: QueueName,
    inbox: Inbox,
    channel: Arc<dyn MessageChannel>,
    model: Arc<M>,
    context: Arc<ModelContext>,
    /// Latest broadcast zone totals; owned by this worker only
    zone_data: Option<Arc<ZoneData>>,
    stats: WorkerStats,
}

impl<M: TravelModel> Worker<M> {
    pub fn new(
        inbox: Inbox,
        channel: Arc<dyn MessageChannel>,
        model: Arc<M>,
        context: Arc<ModelContext>,
    ) -> Self {
        Self {
            queue: inbox.name().clone(),
            inbox,
            channel,
            model,
            context,
            zone_data: None,
            stats: WorkerStats::default(),
        }
    }

    /// Process messages until the queue is closed
    pub async fn run(mut self) -> WorkerStats {
        info!("Worker {} started", self.queue);

        while let Some(received) = self.inbox.recv().await {
            match received {
                Ok(envelope) => {
                    if let Err(e) = self.handle(envelope).await {
                        error!("Worker {} could not send reply: {}", self.queue, e);
                    }
                }
                Err(e) => {
                    warn!("Worker {} discarding undecodable message: {}", self.queue, e);
                    self.stats.discarded += 1;
                }
            }
        }

        info!(
            "Worker {} stopped: {} replies, {} failures",
            self.queue, self.stats.replies_sent, self.stats.computation_failures
        );
        self.stats
    }

    async fn handle(&mut self, envelope: Envelope) -> Result<()> {
        let Envelope { id, sender, body } = envelope;
        debug!("Worker {} received {} ({}) from {}", self.queue, body.name(), id, sender);

        let reply = match body {
            MessageBody::PhaseWork { work } => self.run_phase_work(work).await,
            MessageBody::BroadcastUpdate { zone_data } => self.apply_zone_data(zone_data).await,
            MessageBody::BlockWork { block } => self.process_block(block).await,
            other => {
                warn!(
                    "Worker {} discarding unexpected {} from {}",
                    self.queue,
                    other.name(),
                    sender
                );
                self.stats.discarded += 1;
                return Ok(());
            }
        };

        self.stats.replies_sent += 1;
        self.channel.send(&sender, Envelope::new(self.queue.clone(), reply))
    }

    async fn run_phase_work(&mut self, work: PhaseWork) -> MessageBody {
        let phase = work.phase();

        match work {
            PhaseWork::ModeChoiceLogsums { key } => {
                let result = self
                    .compute(move |model, context| model.mode_choice_logsums(context, key))
                    .await;
                let failed = self.failed(phase, result);
                MessageBody::PhaseReply {
                    phase,
                    reply: PhaseReply::LogsumsCreated { key },
                    failed,
                }
            }

            PhaseWork::WorkplaceLocation { segment, occupation, persons } => {
                debug!(
                    "Worker {} locating {} persons (segment {}, {:?})",
                    self.queue,
                    persons.len(),
                    segment,
                    occupation
                );
                let unchanged = persons.clone();
                let result = self
                    .compute(move |model, context| {
                        model.workplace_locations(context, segment, occupation, persons)
                    })
                    .await;
                let (persons, failed) = match result {
                    Ok(located) => (located, false),
                    Err(e) => {
                        self.record_failure(phase, &e);
                        (unchanged, true)
                    }
                };
                MessageBody::PhaseReply {
                    phase,
                    reply: PhaseReply::WorkplacesAssigned { persons },
                    failed,
                }
            }

            PhaseWork::DestinationChoiceLogsums { key } => {
                let zone_data = self.zone_data.clone();
                let result = self
                    .compute(move |model, context| {
                        model.destination_choice_logsums(context, key, zone_data.as_deref())
                    })
                    .await;
                let failed = self.failed(phase, result);
                MessageBody::PhaseReply {
                    phase,
                    reply: PhaseReply::LogsumsCreated { key },
                    failed,
                }
            }
        }
    }

    async fn apply_zone_data(&mut self, zone_data: ZoneData) -> MessageBody {
        let zone_data = Arc::new(zone_data);
        let shared = Arc::clone(&zone_data);
        let result = self
            .compute(move |model, context| model.update_zone_data(context, &shared))
            .await;

        // Keep the totals even if the model complained; later phases decide.
        self.zone_data = Some(zone_data);
        let failed = self.failed(PhaseTag::ZoneDataUpdate, result);
        MessageBody::BroadcastAck { failed }
    }

    async fn process_block(&mut self, block: Block<Household>) -> MessageBody {
        let Block { sequence, records, request_refill } = block;
        let processed_count = records.len();
        debug!(
            "Worker {} processing block {} ({} households, refill={})",
            self.queue, sequence, processed_count, request_refill
        );

        let zone_data = self.zone_data.clone();
        let result = self
            .compute(move |model, context| {
                model.process_households(context, zone_data.as_deref(), records)
            })
            .await;

        let (households, failed) = match result {
            Ok(households) => (households, false),
            Err(e) => {
                self.record_failure(PhaseTag::HouseholdProcessing, &e);
                (Vec::new(), true)
            }
        };

        MessageBody::BlockReply {
            sequence,
            households,
            processed_count,
            request_refill,
            failed,
        }
    }

    /// Run a collaborator call on the blocking pool; panics become errors.
    fn compute<T, F>(&self, job: F) -> impl Future<Output = Result<T>>
    where
        T: Send + 'static,
        F: FnOnce(&M, &ModelContext) -> Result<T> + Send + 'static,
    {
        let model = Arc::clone(&self.model);
        let context = Arc::clone(&self.context);

        async move {
            tokio::task::spawn_blocking(move || job(&model, &context))
                .await
                .map_err(|e| Error::Computation(format!("collaborator task aborted: {}", e)))?
        }
    }

    fn failed(&mut self, phase: PhaseTag, result: Result<()>) -> bool {
        match result {
            Ok(()) => false,
            Err(e) => {
                self.record_failure(phase, &e);
                true
            }
        }
    }

    fn record_failure(&mut self, phase: PhaseTag, e: &Error) {
        warn!("Worker {} {} computation failed: {}", self.queue, phase, e);
        self.stats.computation_failures += 1;
    }
}
