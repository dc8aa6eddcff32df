//! Phase-barrier dispatcher
//!
//! Single-threaded, message-driven control loop. Each phase fans work out
//! to the worker queues and then waits until exactly the expected number of
//! replies for that phase has arrived. Reaching the barrier runs the
//! transition action that builds the next phase's work from the replies
//! accumulated so far.
//!
//! All mutable state (counters, round-robin cursor, block scheduler) is
//! owned here and only changes inside [`Dispatcher::handle`].

mod progress;
pub mod transitions;

pub use progress::{PipelineSummary, ProgressCounters};

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use ptdaf_common::messages::{
    Block, Household, Person, PhaseReply, PhaseWork, Purpose, SegmentKey, ZoneData,
};
use ptdaf_common::config::FlowControlConfig;
use ptdaf_common::{
    DafConfig, Envelope, Error, Inbox, MessageBody, MessageChannel, ModelContext, PhaseTag,
    QueueName, Result,
};

use crate::marker;
use crate::phases::{self, FanOut, QueueScope};
use crate::population::Population;
use crate::queues::QueueSet;
use crate::scheduler::BlockScheduler;

/// Dispatcher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    /// Waiting for the barrier of this phase
    Active(PhaseTag),
    /// Every phase done; waiting for the results writer
    AwaitingResults,
    /// Completion marker written
    Drained,
}

/// Master side of the pipeline
pub struct Dispatcher {
    name: QueueName,
    results_queue: QueueName,
    channel: Arc<dyn MessageChannel>,
    context: Arc<ModelContext>,
    queues: QueueSet,
    /// Leading queues that receive zone data and serve the phases needing it
    broadcast_queues: usize,
    flow_control: FlowControlConfig,
    done_file: PathBuf,

    state: PipelineState,
    progress: ProgressCounters,
    summary: PipelineSummary,

    households: Vec<Household>,
    /// Persons awaiting workplace location
    persons: Vec<Person>,
    /// Persons returned by workplace location (plus the unemployed)
    located: Vec<Person>,
    scheduler: Option<BlockScheduler<Household>>,
    /// Queues that acknowledged the current broadcast
    acknowledged: BTreeSet<QueueName>,
    /// Block sequence -> queue it was sent to, until its reply arrives
    outstanding_blocks: BTreeMap<usize, QueueName>,
}

impl Dispatcher {
    pub fn new(
        config: &DafConfig,
        context: Arc<ModelContext>,
        population: Population,
        channel: Arc<dyn MessageChannel>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            name: QueueName::master(),
            results_queue: QueueName::results_writer(),
            channel,
            context,
            queues: QueueSet::new(config.queues.work_queues)?,
            broadcast_queues: config.queues.broadcast_queues,
            flow_control: config.flow_control.clone(),
            done_file: config.output.done_file.clone(),
            state: PipelineState::Idle,
            progress: ProgressCounters::new(phases::first_phase()),
            summary: PipelineSummary::default(),
            households: population.households,
            persons: population.persons,
            located: Vec::new(),
            scheduler: None,
            acknowledged: BTreeSet::new(),
            outstanding_blocks: BTreeMap::new(),
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn progress(&self) -> &ProgressCounters {
        &self.progress
    }

    pub fn summary(&self) -> &PipelineSummary {
        &self.summary
    }

    /// Enter the first phase and emit its work
    pub fn start(&mut self) -> Result<()> {
        if self.state != PipelineState::Idle {
            return Err(Error::Protocol(format!(
                "Dispatcher already started (state {:?})",
                self.state
            )));
        }

        info!(
            "Starting pipeline: {} work queues, {} broadcast queues, {} households, {} persons",
            self.queues.names().len(),
            self.broadcast_queues,
            self.households.len(),
            self.persons.len()
        );

        let first = phases::first_phase();
        if self.enter(first)? == 0 {
            self.advance_from(first)?;
        }
        Ok(())
    }

    /// Drive the pipeline from `inbox` until the completion marker is written
    pub async fn run(mut self, mut inbox: Inbox) -> Result<PipelineSummary> {
        self.start()?;

        while self.state != PipelineState::Drained {
            match inbox.recv().await {
                Some(Ok(envelope)) => self.handle(envelope)?,
                Some(Err(e)) => {
                    warn!("Dispatcher discarding undecodable message: {}", e);
                    self.summary.discarded_messages += 1;
                }
                None => {
                    return Err(Error::Channel(format!(
                        "{} closed before the pipeline drained (state {:?})",
                        inbox.name(),
                        self.state
                    )));
                }
            }
        }

        info!("Pipeline drained: {}", self.summary);
        Ok(self.summary)
    }

    /// Process one inbound message
    pub fn handle(&mut self, envelope: Envelope) -> Result<()> {
        let Envelope { id, sender, body } = envelope;
        debug!("Dispatcher received {} {} from {}", body.name(), id, sender);

        let Some(tag) = body.phase() else {
            return self.handle_results_traffic(&sender, body);
        };

        if self.state != PipelineState::Active(tag) {
            warn!(
                "Discarding {} for inactive phase {} from {} (state {:?})",
                body.name(),
                tag,
                sender,
                self.state
            );
            self.summary.discarded_messages += 1;
            return Ok(());
        }

        let records = match self.absorb(tag, &sender, body) {
            Ok(records) => records,
            Err(e) if e.is_discardable() => {
                warn!("Discarding reply from {} in phase {}: {}", sender, tag, e);
                self.summary.discarded_messages += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        self.progress.record_reply(records);
        debug!("Phase {} progress: {}", tag, self.progress);

        if self.progress.threshold_reached() {
            info!(
                "Phase {} complete: {} replies, {} records",
                tag, self.progress.replies_received, self.progress.records_processed
            );
            self.advance_from(tag)?;
        }
        Ok(())
    }

    // ========================================================================
    // Phase transitions
    // ========================================================================

    /// Record `completed` and enter following phases until one has work
    fn advance_from(&mut self, completed: PhaseTag) -> Result<()> {
        let mut completed = completed;
        loop {
            self.summary.phases_completed.push(completed);

            let Some(next) = phases::definition(completed).next else {
                return self.finish();
            };

            if self.enter(next)? > 0 {
                return Ok(());
            }
            info!("Phase {} emitted no work, barrier reached immediately", next);
            completed = next;
        }
    }

    /// Activate `tag`, emit its work, and return the expected reply count
    fn enter(&mut self, tag: PhaseTag) -> Result<usize> {
        self.state = PipelineState::Active(tag);
        self.progress = ProgressCounters::new(tag);
        self.acknowledged.clear();

        let definition = phases::definition(tag);
        let in_scope = self.queues_in_scope(definition.scope);
        let (messages, total_blocks) = match definition.fan_out {
            FanOut::RoundRobin => {
                let mut sent = 0;
                for body in self.build_work(tag) {
                    let queue = self.queues.next_round_robin_within(in_scope);
                    self.send(&queue, body)?;
                    sent += 1;
                }
                (sent, 0)
            }
            FanOut::Broadcast => {
                let targets = self.queues.leading(in_scope).to_vec();
                let mut sent = 0;
                for body in self.build_work(tag) {
                    for queue in &targets {
                        self.send(queue, body.clone())?;
                        sent += 1;
                    }
                }
                (sent, 0)
            }
            FanOut::FlowControlled => self.start_blocks(in_scope)?,
        };

        let expected = definition.barrier.expected_replies(messages, total_blocks);
        self.progress.expect(expected);
        info!(
            "Phase {} started: {} messages sent, expecting {} replies",
            tag, messages, expected
        );
        Ok(expected)
    }

    fn queues_in_scope(&self, scope: QueueScope) -> usize {
        match scope {
            QueueScope::AllQueues => self.queues.names().len(),
            QueueScope::ZoneDataHolders => self.broadcast_queues,
        }
    }

    /// Work bodies for a round-robin or broadcast phase
    fn build_work(&mut self, tag: PhaseTag) -> Vec<MessageBody> {
        match tag {
            PhaseTag::ModeChoiceLogsums => SegmentKey::cross_product(&Purpose::ALL)
                .into_iter()
                .map(|key| MessageBody::PhaseWork {
                    work: PhaseWork::ModeChoiceLogsums { key },
                })
                .collect(),
            PhaseTag::WorkplaceLocation => {
                let grouped = transitions::group_workers(std::mem::take(&mut self.persons));
                debug!(
                    "{} worker groups, {} persons without a workplace",
                    grouped.groups.len(),
                    grouped.unemployed.len()
                );
                self.located.extend(grouped.unemployed);
                grouped
                    .groups
                    .into_iter()
                    .map(|((segment, occupation), persons)| MessageBody::PhaseWork {
                        work: PhaseWork::WorkplaceLocation {
                            segment,
                            occupation,
                            persons,
                        },
                    })
                    .collect()
            }
            PhaseTag::ZoneDataUpdate => {
                let persons = std::mem::take(&mut self.located);
                self.summary.persons_located = persons.len();

                let orphans = transitions::attach_members(&mut self.households, &persons);
                if orphans > 0 {
                    warn!("{} located persons have no household", orphans);
                }

                let zone_data = ZoneData::tabulate(self.context.zones, &self.households, &persons);
                vec![MessageBody::BroadcastUpdate { zone_data }]
            }
            PhaseTag::DestinationChoiceLogsums => SegmentKey::cross_product(&Purpose::NON_WORK)
                .into_iter()
                .map(|key| MessageBody::PhaseWork {
                    work: PhaseWork::DestinationChoiceLogsums { key },
                })
                .collect(),
            // Blocks come from the scheduler
            PhaseTag::HouseholdProcessing => Vec::new(),
        }
    }

    /// Hand households to the scheduler and send each of the first
    /// `queue_count` queues its initial burst. Returns (blocks sent, total blocks).
    fn start_blocks(&mut self, queue_count: usize) -> Result<(usize, usize)> {
        let households = transitions::order_households(std::mem::take(&mut self.households));
        let mut scheduler = BlockScheduler::new(households, &self.flow_control)?;
        let total_blocks = scheduler.total_blocks();
        let bursts = scheduler.initial_bursts(queue_count);
        self.scheduler = Some(scheduler);

        let mut sent = 0;
        for (index, blocks) in bursts {
            let queue = self
                .queues
                .name(index)
                .cloned()
                .ok_or_else(|| Error::Protocol(format!("No work queue at index {}", index)))?;
            sent += blocks.len();
            self.send_blocks(&queue, blocks)?;
        }

        info!(
            "Household processing: {} blocks of up to {} households",
            total_blocks, self.flow_control.max_block_size
        );
        Ok((sent, total_blocks))
    }

    /// Signal the results writer that every block has been processed
    fn finish(&mut self) -> Result<()> {
        self.state = PipelineState::AwaitingResults;
        let households = self.summary.households_processed;
        info!(
            "All phases complete, {} households processed. Waiting for results writer",
            households
        );
        self.send(&self.results_queue, MessageBody::PipelineDone { households })
    }

    // ========================================================================
    // Reply handling
    // ========================================================================

    /// Fold a reply for the active phase into the accumulated state.
    ///
    /// Returns the records it accounts for.
    fn absorb(&mut self, tag: PhaseTag, sender: &QueueName, body: MessageBody) -> Result<usize> {
        if self.queues.position(sender).is_none() {
            return Err(Error::Protocol(format!("{} is not a work queue", sender)));
        }

        match body {
            MessageBody::PhaseReply { reply, failed, .. } => {
                let records = match (tag, reply) {
                    (
                        PhaseTag::ModeChoiceLogsums | PhaseTag::DestinationChoiceLogsums,
                        PhaseReply::LogsumsCreated { key },
                    ) => {
                        debug!("Logsums {} ready on {}", key, sender);
                        1
                    }
                    (PhaseTag::WorkplaceLocation, PhaseReply::WorkplacesAssigned { persons }) => {
                        let count = persons.len();
                        self.located.extend(persons);
                        count
                    }
                    (tag, reply) => {
                        return Err(Error::Protocol(format!(
                            "Reply {:?} does not belong to phase {}",
                            reply, tag
                        )));
                    }
                };
                self.note_failure(failed, tag, sender);
                Ok(records)
            }
            MessageBody::BroadcastAck { failed } => {
                if !self.queues.leading(self.broadcast_queues).contains(sender) {
                    return Err(Error::Protocol(format!(
                        "{} acknowledged a broadcast it was not sent",
                        sender
                    )));
                }
                if !self.acknowledged.insert(sender.clone()) {
                    return Err(Error::Protocol(format!(
                        "{} already acknowledged the broadcast",
                        sender
                    )));
                }
                self.note_failure(failed, tag, sender);
                Ok(0)
            }
            MessageBody::BlockReply {
                sequence,
                households,
                processed_count,
                request_refill,
                failed,
            } => {
                self.claim_block(sequence, sender)?;
                self.note_failure(failed, tag, sender);
                debug!(
                    "Block {} from {}: {} households processed",
                    sequence, sender, processed_count
                );

                if !households.is_empty() {
                    self.summary.households_processed += households.len();
                    self.send(&self.results_queue, MessageBody::ResultsBatch { households })?;
                }
                if request_refill {
                    self.refill(sender)?;
                }
                Ok(processed_count)
            }
            other => Err(Error::Protocol(format!("{} is not a reply", other.name()))),
        }
    }

    /// Retire an outstanding block sequence on its reply.
    ///
    /// A reply for a sequence that is not outstanding, or from a queue other
    /// than the one the block went to, is rejected and changes nothing.
    fn claim_block(&mut self, sequence: usize, sender: &QueueName) -> Result<()> {
        match self.outstanding_blocks.get(&sequence) {
            None => Err(Error::Protocol(format!(
                "Block {} from {} is not outstanding",
                sequence, sender
            ))),
            Some(queue) if queue != sender => Err(Error::Protocol(format!(
                "Block {} was sent to {}, not {}",
                sequence, queue, sender
            ))),
            Some(_) => {
                self.outstanding_blocks.remove(&sequence);
                Ok(())
            }
        }
    }

    /// Answer a refill request with the next secondary burst
    fn refill(&mut self, queue: &QueueName) -> Result<()> {
        self.summary.refill_requests += 1;

        let blocks = match self.scheduler.as_mut() {
            Some(scheduler) => scheduler.refill(),
            None => return Err(Error::Protocol("Refill requested before blocks were scheduled".to_string())),
        };

        if blocks.is_empty() {
            debug!("Refill from {} after households were exhausted", queue);
            return Ok(());
        }
        debug!("Refilling {} with {} blocks", queue, blocks.len());
        self.send_blocks(queue, blocks)
    }

    fn note_failure(&mut self, failed: bool, tag: PhaseTag, sender: &QueueName) {
        if failed {
            warn!("{} reported a failed computation in phase {}", sender, tag);
            self.summary.failed_replies += 1;
        }
    }

    fn handle_results_traffic(&mut self, sender: &QueueName, body: MessageBody) -> Result<()> {
        match body {
            MessageBody::ResultsWritten { households }
                if self.state == PipelineState::AwaitingResults && *sender == self.results_queue =>
            {
                info!("Results writer acknowledged {} households", households);
                marker::write_completion_marker(&self.done_file, &self.summary)?;
                self.state = PipelineState::Drained;
                Ok(())
            }
            other => {
                warn!(
                    "Discarding unexpected {} from {} (state {:?})",
                    other.name(),
                    sender,
                    self.state
                );
                self.summary.discarded_messages += 1;
                Ok(())
            }
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    fn send(&self, queue: &QueueName, body: MessageBody) -> Result<()> {
        self.channel.send(queue, Envelope::new(self.name.clone(), body))
    }

    fn send_blocks(&mut self, queue: &QueueName, blocks: Vec<Block<Household>>) -> Result<()> {
        for block in blocks {
            self.summary.blocks_emitted += 1;
            self.outstanding_blocks.insert(block.sequence, queue.clone());
            self.send(queue, MessageBody::BlockWork { block })?;
        }
        Ok(())
    }
}
