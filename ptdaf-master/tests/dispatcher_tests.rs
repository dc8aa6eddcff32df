//! Dispatcher state machine tests
//!
//! The dispatcher is driven synchronously: a recording channel captures
//! everything it sends, and the tests answer work the way workers would.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ptdaf_common::messages::{
    Household, Occupation, Person, PhaseReply, PhaseWork, Purpose, SegmentKey,
};
use ptdaf_common::{
    DafConfig, Envelope, MessageBody, MessageChannel, ModelContext, PhaseTag, QueueName, Result,
};
use ptdaf_master::{Dispatcher, PipelineState, Population};
use tempfile::TempDir;

const ZONES: usize = 10;

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<(QueueName, Envelope)>>,
}

impl RecordingChannel {
    fn take(&self) -> Vec<(QueueName, Envelope)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl MessageChannel for RecordingChannel {
    fn send(&self, queue: &QueueName, envelope: Envelope) -> Result<()> {
        self.sent.lock().unwrap().push((queue.clone(), envelope));
        Ok(())
    }
}

struct Setup {
    work_queues: usize,
    broadcast_queues: usize,
    max_block_size: usize,
    initial_burst: usize,
    secondary_burst: usize,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            work_queues: 3,
            broadcast_queues: 3,
            max_block_size: 20,
            initial_burst: 2,
            secondary_burst: 6,
        }
    }
}

struct Harness {
    dispatcher: Dispatcher,
    channel: Arc<RecordingChannel>,
    done_file: PathBuf,
    results_households: usize,
    _temp_dir: TempDir,
}

impl Harness {
    fn new(setup: Setup, population: Population) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let done_file = temp_dir.path().join("status").join("ptdaf_done.txt");

        let config = DafConfig::from_toml_str(&format!(
            r#"
[queues]
work_queues = {}
broadcast_queues = {}

[flow_control]
max_block_size = {}
initial_burst = {}
secondary_burst = {}

[population]
zones = {}

[output]
done_file = "{}"
"#,
            setup.work_queues,
            setup.broadcast_queues,
            setup.max_block_size,
            setup.initial_burst,
            setup.secondary_burst,
            ZONES,
            done_file.display()
        ))
        .unwrap();

        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = Dispatcher::new(
            &config,
            Arc::new(ModelContext::new(ZONES, 3)),
            population,
            channel.clone(),
        )
        .unwrap();

        Self {
            dispatcher,
            channel,
            done_file,
            results_households: 0,
            _temp_dir: temp_dir,
        }
    }

    fn start(&mut self) {
        self.dispatcher.start().unwrap();
    }

    fn reply(&mut self, from: &QueueName, body: MessageBody) {
        self.dispatcher
            .handle(Envelope::new(from.clone(), body))
            .unwrap();
    }

    /// Answer everything the dispatcher sends until it goes quiet. Messages
    /// matching `hold` are returned unanswered.
    fn pump(&mut self, hold: impl Fn(&MessageBody) -> bool) -> Vec<(QueueName, Envelope)> {
        let mut held = Vec::new();
        loop {
            let sent = self.channel.take();
            if sent.is_empty() {
                return held;
            }

            for (queue, envelope) in sent {
                if hold(&envelope.body) {
                    held.push((queue, envelope));
                    continue;
                }
                match envelope.body {
                    MessageBody::ResultsBatch { households } => {
                        self.results_households += households.len();
                    }
                    MessageBody::PipelineDone { households } => {
                        self.reply(
                            &QueueName::results_writer(),
                            MessageBody::ResultsWritten { households },
                        );
                    }
                    work => {
                        let reply = answer(&work).expect("work message");
                        self.reply(&queue, reply);
                    }
                }
            }
        }
    }

    fn pump_all(&mut self) {
        let held = self.pump(|_| false);
        assert!(held.is_empty());
    }

    fn state(&self) -> PipelineState {
        self.dispatcher.state()
    }
}

/// What a healthy worker replies to a work message
fn answer(body: &MessageBody) -> Option<MessageBody> {
    match body {
        MessageBody::PhaseWork { work } => {
            let reply = match work {
                PhaseWork::ModeChoiceLogsums { key } | PhaseWork::DestinationChoiceLogsums { key } => {
                    PhaseReply::LogsumsCreated { key: *key }
                }
                PhaseWork::WorkplaceLocation { persons, .. } => PhaseReply::WorkplacesAssigned {
                    persons: persons
                        .iter()
                        .cloned()
                        .map(|mut p| {
                            p.work_zone = Some(1);
                            p
                        })
                        .collect(),
                },
            };
            Some(MessageBody::PhaseReply {
                phase: work.phase(),
                reply,
                failed: false,
            })
        }
        MessageBody::BroadcastUpdate { .. } => Some(MessageBody::BroadcastAck { failed: false }),
        MessageBody::BlockWork { block } => Some(MessageBody::BlockReply {
            sequence: block.sequence,
            households: block.records.clone(),
            processed_count: block.len(),
            request_refill: block.request_refill,
            failed: false,
        }),
        _ => None,
    }
}

fn households(count: u64) -> Population {
    Population {
        households: (1..=count)
            .map(|id| Household {
                id,
                home_zone: (id % ZONES as u64) as u32 + 1,
                size: 1,
                workers: 0,
                autos: 0,
                work_segment: (id % 3) as u8,
                non_work_segment: 0,
                members: Vec::new(),
                tours: None,
            })
            .collect(),
        persons: Vec::new(),
    }
}

/// Households with one employed person each
fn staffed(count: u64) -> Population {
    let mut population = households(count);
    population.persons = population
        .households
        .iter()
        .map(|h| Person {
            id: h.id,
            household_id: h.id,
            home_zone: h.home_zone,
            work_segment: h.work_segment,
            occupation: Occupation::Retail,
            employed: true,
            work_zone: None,
        })
        .collect();
    population
}

fn is_block(body: &MessageBody) -> bool {
    matches!(body, MessageBody::BlockWork { .. })
}

fn is_broadcast(body: &MessageBody) -> bool {
    matches!(body, MessageBody::BroadcastUpdate { .. })
}

fn logsum_reply(key: SegmentKey) -> MessageBody {
    MessageBody::PhaseReply {
        phase: PhaseTag::ModeChoiceLogsums,
        reply: PhaseReply::LogsumsCreated { key },
        failed: false,
    }
}

// ============================================================================
// Fan-out and barriers
// ============================================================================

#[test]
fn test_first_phase_is_round_robin_over_all_keys() {
    let mut harness = Harness::new(Setup::default(), Population::synthesize(10, ZONES, 1));
    harness.start();

    let sent = harness.channel.take();
    assert_eq!(sent.len(), 54);
    for (i, (queue, _)) in sent.iter().enumerate() {
        assert_eq!(*queue, QueueName::work_queue(i % 3));
    }
    assert_eq!(harness.state(), PipelineState::Active(PhaseTag::ModeChoiceLogsums));
    assert_eq!(harness.dispatcher.progress().expected, Some(54));
}

#[test]
fn test_transition_fires_exactly_once() {
    let mut harness = Harness::new(Setup::default(), staffed(10));
    harness.start();

    let keys = SegmentKey::cross_product(&Purpose::ALL);
    let queue = QueueName::work_queue(0);
    for key in &keys[..53] {
        harness.reply(&queue, logsum_reply(*key));
    }
    assert_eq!(harness.state(), PipelineState::Active(PhaseTag::ModeChoiceLogsums));

    harness.reply(&queue, logsum_reply(keys[53]));
    assert_eq!(harness.state(), PipelineState::Active(PhaseTag::WorkplaceLocation));

    // A late duplicate must not advance anything
    harness.reply(&queue, logsum_reply(keys[0]));
    assert_eq!(harness.state(), PipelineState::Active(PhaseTag::WorkplaceLocation));
    assert_eq!(
        harness.dispatcher.summary().phases_completed,
        vec![PhaseTag::ModeChoiceLogsums]
    );
    assert_eq!(harness.dispatcher.summary().discarded_messages, 1);
}

#[test]
fn test_reply_for_inactive_phase_is_discarded() {
    let mut harness = Harness::new(Setup::default(), Population::synthesize(10, ZONES, 1));
    harness.start();

    harness.reply(
        &QueueName::work_queue(1),
        MessageBody::BroadcastAck { failed: false },
    );
    harness.reply(
        &QueueName::work_queue(1),
        MessageBody::BlockReply {
            sequence: 0,
            households: Vec::new(),
            processed_count: 5,
            request_refill: true,
            failed: false,
        },
    );

    assert_eq!(harness.dispatcher.progress().replies_received, 0);
    assert_eq!(harness.dispatcher.summary().discarded_messages, 2);
    assert_eq!(harness.dispatcher.summary().refill_requests, 0);
}

#[test]
fn test_mismatched_reply_for_active_phase_is_discarded() {
    let mut harness = Harness::new(Setup::default(), Population::synthesize(10, ZONES, 1));
    harness.start();

    harness.reply(
        &QueueName::work_queue(0),
        MessageBody::PhaseReply {
            phase: PhaseTag::ModeChoiceLogsums,
            reply: PhaseReply::WorkplacesAssigned { persons: Vec::new() },
            failed: false,
        },
    );
    harness.reply(
        &QueueName::new("SomeOtherQueue"),
        logsum_reply(SegmentKey { purpose: Purpose::Work, segment: 0 }),
    );

    assert_eq!(harness.dispatcher.progress().replies_received, 0);
    assert_eq!(harness.dispatcher.summary().discarded_messages, 2);
}

#[test]
fn test_failed_reply_still_counts_toward_barrier() {
    let mut harness = Harness::new(
        Setup { work_queues: 1, broadcast_queues: 1, ..Setup::default() },
        staffed(10),
    );
    harness.start();

    let queue = QueueName::work_queue(0);
    for key in SegmentKey::cross_product(&Purpose::ALL) {
        harness.reply(
            &queue,
            MessageBody::PhaseReply {
                phase: PhaseTag::ModeChoiceLogsums,
                reply: PhaseReply::LogsumsCreated { key },
                failed: true,
            },
        );
    }

    assert_eq!(harness.state(), PipelineState::Active(PhaseTag::WorkplaceLocation));
    assert_eq!(harness.dispatcher.summary().failed_replies, 54);
}

#[test]
fn test_broadcast_waits_for_every_ack_in_any_order() {
    let mut harness = Harness::new(
        Setup { work_queues: 4, broadcast_queues: 4, ..Setup::default() },
        Population::synthesize(30, ZONES, 5),
    );
    harness.start();

    let mut held = harness.pump(is_broadcast);
    let targets: Vec<QueueName> = held.iter().map(|(q, _)| q.clone()).collect();
    assert_eq!(targets, (0..4).map(QueueName::work_queue).collect::<Vec<_>>());
    assert_eq!(harness.state(), PipelineState::Active(PhaseTag::ZoneDataUpdate));

    held.reverse();
    let last = held.pop().unwrap();
    for (queue, _) in &held {
        harness.reply(queue, MessageBody::BroadcastAck { failed: false });
        assert_eq!(harness.state(), PipelineState::Active(PhaseTag::ZoneDataUpdate));
    }

    harness.reply(&last.0, MessageBody::BroadcastAck { failed: false });
    assert_eq!(
        harness.state(),
        PipelineState::Active(PhaseTag::DestinationChoiceLogsums)
    );
    assert_eq!(harness.channel.take().len(), 45);
}

#[test]
fn test_repeated_ack_from_one_queue_does_not_complete_broadcast() {
    let mut harness = Harness::new(
        Setup { work_queues: 4, broadcast_queues: 4, ..Setup::default() },
        Population::synthesize(30, ZONES, 5),
    );
    harness.start();
    harness.pump(is_broadcast);

    let first = QueueName::work_queue(0);
    for _ in 0..4 {
        harness.reply(&first, MessageBody::BroadcastAck { failed: false });
    }
    assert_eq!(harness.state(), PipelineState::Active(PhaseTag::ZoneDataUpdate));
    assert_eq!(harness.dispatcher.progress().replies_received, 1);
    assert_eq!(harness.dispatcher.summary().discarded_messages, 3);

    for index in 1..4 {
        harness.reply(&QueueName::work_queue(index), MessageBody::BroadcastAck { failed: false });
    }
    assert_eq!(
        harness.state(),
        PipelineState::Active(PhaseTag::DestinationChoiceLogsums)
    );
}

#[test]
fn test_zone_data_phases_stay_on_broadcast_queues() {
    let mut harness = Harness::new(
        Setup { work_queues: 4, broadcast_queues: 2, ..Setup::default() },
        Population::synthesize(120, ZONES, 5),
    );
    harness.start();

    let held = harness.pump(is_broadcast);
    let targets: Vec<QueueName> = held.iter().map(|(q, _)| q.clone()).collect();
    assert_eq!(targets, vec![QueueName::work_queue(0), QueueName::work_queue(1)]);

    // A queue that was never sent zone data cannot acknowledge it
    harness.reply(&QueueName::work_queue(3), MessageBody::BroadcastAck { failed: false });
    assert_eq!(harness.dispatcher.progress().replies_received, 0);
    assert_eq!(harness.dispatcher.summary().discarded_messages, 1);

    for (queue, _) in &held {
        harness.reply(queue, MessageBody::BroadcastAck { failed: false });
    }
    assert_eq!(
        harness.state(),
        PipelineState::Active(PhaseTag::DestinationChoiceLogsums)
    );

    let logsums = harness.channel.take();
    assert_eq!(logsums.len(), 45);
    let holders = [QueueName::work_queue(0), QueueName::work_queue(1)];
    for pair in logsums.windows(2) {
        assert_ne!(pair[0].0, pair[1].0);
    }
    for (queue, envelope) in &logsums {
        assert!(holders.contains(queue));
        let reply = answer(&envelope.body).unwrap();
        harness.reply(queue, reply);
    }
    assert_eq!(
        harness.state(),
        PipelineState::Active(PhaseTag::HouseholdProcessing)
    );

    let blocks = harness.pump(is_block);
    assert!(blocks.iter().all(|(q, _)| holders.contains(q)));
    for (queue, envelope) in &blocks {
        let reply = answer(&envelope.body).unwrap();
        harness.reply(queue, reply);
    }
    harness.pump_all();

    assert_eq!(harness.state(), PipelineState::Drained);
    let summary = harness.dispatcher.summary();
    assert_eq!(summary.households_processed, 120);
    assert_eq!(summary.failed_replies, 0);
    assert_eq!(summary.discarded_messages, 1);
}

#[test]
fn test_zone_data_counts_located_teachers() {
    let population = Population {
        households: vec![Household {
            id: 1,
            home_zone: 3,
            size: 2,
            workers: 2,
            autos: 1,
            work_segment: 7,
            non_work_segment: 4,
            members: Vec::new(),
            tours: None,
        }],
        persons: [Occupation::PostSecondaryTeacher, Occupation::OtherTeacher]
            .into_iter()
            .enumerate()
            .map(|(i, occupation)| Person {
                id: i as u64 + 1,
                household_id: 1,
                home_zone: 3,
                work_segment: 7,
                occupation,
                employed: true,
                work_zone: None,
            })
            .collect(),
    };
    let mut harness = Harness::new(Setup::default(), population);
    harness.start();

    let held = harness.pump(is_broadcast);
    let MessageBody::BroadcastUpdate { zone_data } = &held[0].1.body else {
        panic!("expected a broadcast");
    };
    assert_eq!(zone_data.households_by_zone[3], 1);
    assert_eq!(zone_data.post_secondary_teachers[1], 1);
    assert_eq!(zone_data.other_teachers[1], 1);
    assert_eq!(harness.dispatcher.summary().persons_located, 2);
}

#[test]
fn test_phase_without_work_completes_immediately() {
    let mut population = households(4);
    population.persons.push(Person {
        id: 1,
        household_id: 1,
        home_zone: 2,
        work_segment: 1,
        occupation: Occupation::Unemployed,
        employed: false,
        work_zone: None,
    });
    let mut harness = Harness::new(Setup::default(), population);
    harness.start();

    let queue = QueueName::work_queue(0);
    for key in SegmentKey::cross_product(&Purpose::ALL) {
        harness.reply(&queue, logsum_reply(key));
    }

    // No employed persons: workplace location is skipped
    assert_eq!(harness.state(), PipelineState::Active(PhaseTag::ZoneDataUpdate));
    assert_eq!(
        harness.dispatcher.summary().phases_completed,
        vec![PhaseTag::ModeChoiceLogsums, PhaseTag::WorkplaceLocation]
    );
    assert_eq!(harness.dispatcher.summary().persons_located, 1);
}

#[test]
fn test_empty_population_drains() {
    let mut harness = Harness::new(Setup::default(), Population::default());
    harness.start();
    harness.pump_all();

    assert_eq!(harness.state(), PipelineState::Drained);
    let summary = harness.dispatcher.summary();
    assert_eq!(summary.phases_completed.len(), 5);
    assert_eq!(summary.blocks_emitted, 0);
    assert!(harness.done_file.exists());
}

// ============================================================================
// Flow-controlled household processing
// ============================================================================

#[test]
fn test_initial_bursts_for_three_queues() {
    let mut harness = Harness::new(Setup::default(), households(55));
    harness.start();

    let held = harness.pump(is_block);
    assert_eq!(
        harness.state(),
        PipelineState::Active(PhaseTag::HouseholdProcessing)
    );
    assert_eq!(harness.dispatcher.progress().expected, Some(3));

    let shape: Vec<(QueueName, usize, bool)> = held
        .iter()
        .map(|(queue, envelope)| match &envelope.body {
            MessageBody::BlockWork { block } => (queue.clone(), block.len(), block.request_refill),
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(
        shape,
        vec![
            (QueueName::work_queue(0), 20, true),
            (QueueName::work_queue(0), 20, false),
            (QueueName::work_queue(1), 15, false),
        ]
    );

    // Answer the flagged block: the record set is exhausted, so no refill
    let (queue, envelope) = &held[0];
    let reply = answer(&envelope.body).unwrap();
    harness.reply(queue, reply);
    let sent = harness.channel.take();
    assert!(sent.iter().all(|(q, _)| *q == QueueName::results_writer()));
    assert_eq!(harness.dispatcher.summary().refill_requests, 1);

    for (queue, envelope) in &held[1..] {
        let reply = answer(&envelope.body).unwrap();
        harness.reply(queue, reply);
    }
    assert_eq!(harness.state(), PipelineState::AwaitingResults);

    harness.pump_all();
    assert_eq!(harness.state(), PipelineState::Drained);
    assert_eq!(harness.dispatcher.summary().households_processed, 55);
    assert!(harness.done_file.exists());
}

#[test]
fn test_refills_drain_every_household() {
    let mut harness = Harness::new(
        Setup {
            work_queues: 2,
            broadcast_queues: 1,
            max_block_size: 10,
            initial_burst: 2,
            secondary_burst: 3,
        },
        households(200),
    );
    harness.start();
    harness.pump_all();

    assert_eq!(harness.state(), PipelineState::Drained);
    let summary = harness.dispatcher.summary();
    assert_eq!(summary.blocks_emitted, 20);
    assert_eq!(summary.households_processed, 200);
    assert!(summary.refill_requests > 0);
    assert_eq!(harness.results_households, 200);

    let marker = std::fs::read_to_string(&harness.done_file).unwrap();
    assert!(marker.starts_with("ptdaf is done. "));
    assert!(marker.contains("households_processed = 200"));
}

#[test]
fn test_blocks_arrive_in_segment_order() {
    let mut harness = Harness::new(
        Setup {
            work_queues: 1,
            broadcast_queues: 1,
            max_block_size: 100,
            initial_burst: 1,
            secondary_burst: 1,
        },
        households(9),
    );
    harness.start();

    let held = harness.pump(is_block);
    let MessageBody::BlockWork { block } = &held[0].1.body else {
        panic!("expected a block");
    };
    let segments: Vec<u8> = block.records.iter().map(|h| h.work_segment).collect();
    assert_eq!(segments, vec![0, 0, 0, 1, 1, 1, 2, 2, 2]);
}

#[test]
fn test_completion_marker_waits_for_results_ack() {
    let mut harness = Harness::new(Setup::default(), households(5));
    harness.start();
    harness.pump(|body| matches!(body, MessageBody::PipelineDone { .. }));

    assert_eq!(harness.state(), PipelineState::AwaitingResults);
    assert!(!harness.done_file.exists());

    // Only the results writer may acknowledge
    harness.reply(
        &QueueName::work_queue(0),
        MessageBody::ResultsWritten { households: 5 },
    );
    assert_eq!(harness.state(), PipelineState::AwaitingResults);

    harness.reply(
        &QueueName::results_writer(),
        MessageBody::ResultsWritten { households: 5 },
    );
    assert_eq!(harness.state(), PipelineState::Drained);
    assert!(harness.done_file.exists());
}

#[test]
fn test_start_twice_is_an_error() {
    let mut harness = Harness::new(Setup::default(), Population::default());
    harness.start();
    assert!(harness.dispatcher.start().is_err());
}

#[test]
fn test_repeated_block_reply_is_discarded() {
    let mut harness = Harness::new(Setup::default(), households(55));
    harness.start();

    let held = harness.pump(is_block);
    assert_eq!(held.len(), 3);

    let (queue, envelope) = &held[0];
    let reply = answer(&envelope.body).unwrap();
    for _ in 0..3 {
        harness.reply(queue, reply.clone());
    }
    assert_eq!(
        harness.state(),
        PipelineState::Active(PhaseTag::HouseholdProcessing)
    );
    let summary = harness.dispatcher.summary();
    assert_eq!(summary.households_processed, 20);
    assert_eq!(summary.refill_requests, 1);
    assert_eq!(summary.discarded_messages, 2);

    // The remaining blocks are still accepted
    for (queue, envelope) in &held[1..] {
        let reply = answer(&envelope.body).unwrap();
        harness.reply(queue, reply);
    }
    assert_eq!(harness.state(), PipelineState::AwaitingResults);
    assert_eq!(harness.dispatcher.summary().households_processed, 55);
}

#[test]
fn test_block_reply_must_come_from_its_queue() {
    let mut harness = Harness::new(Setup::default(), households(55));
    harness.start();

    let held = harness.pump(is_block);
    let (queue, envelope) = &held[0];
    assert_eq!(*queue, QueueName::work_queue(0));
    let reply = answer(&envelope.body).unwrap();

    harness.reply(&QueueName::work_queue(1), reply.clone());
    harness.reply(
        &QueueName::work_queue(0),
        MessageBody::BlockReply {
            sequence: 99,
            households: Vec::new(),
            processed_count: 20,
            request_refill: true,
            failed: false,
        },
    );
    let summary = harness.dispatcher.summary();
    assert_eq!(summary.discarded_messages, 2);
    assert_eq!(summary.refill_requests, 0);
    assert_eq!(summary.households_processed, 0);
    assert_eq!(harness.dispatcher.progress().replies_received, 0);

    // The block stays outstanding for the queue it went to
    harness.reply(queue, reply);
    assert_eq!(harness.dispatcher.progress().replies_received, 1);
    assert_eq!(harness.dispatcher.summary().households_processed, 20);
}
