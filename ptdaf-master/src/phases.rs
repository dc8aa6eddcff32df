//! Phase Definition Table
//!
//! Static description of the pipeline stages: how work fans out, how the
//! completion barrier counts replies, and which phase follows. The work
//! itself is built by the dispatcher when a phase is entered, from the
//! replies accumulated during the previous phase.

use ptdaf_common::PhaseTag;

/// Strategy for distributing a phase's work across queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    /// Message i goes to the next queue in scope, advancing the cursor
    RoundRobin,
    /// Identical message to every queue in scope
    Broadcast,
    /// Bounded blocks with credit-based refill
    FlowControlled,
}

/// Which work queues serve a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueScope {
    /// Every work queue
    AllQueues,
    /// Only the queues that received the zone data broadcast
    ZoneDataHolders,
}

/// How the completion barrier is computed before emission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    /// One reply per message emitted (round-robin and broadcast)
    EveryMessage,
    /// One reply per block of the whole record set: ceil(R / max block size)
    EveryBlock,
}

impl Barrier {
    /// Replies required before the phase is complete
    pub fn expected_replies(&self, messages_emitted: usize, total_blocks: usize) -> usize {
        match self {
            Barrier::EveryMessage => messages_emitted,
            Barrier::EveryBlock => total_blocks,
        }
    }
}

/// One row of the phase table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseDefinition {
    pub tag: PhaseTag,
    pub fan_out: FanOut,
    pub scope: QueueScope,
    pub barrier: Barrier,
    /// Phase entered once the barrier is reached; `None` drains the pipeline
    pub next: Option<PhaseTag>,
}

/// Pipeline phases in execution order
pub const PHASE_TABLE: [PhaseDefinition; 5] = [
    PhaseDefinition {
        tag: PhaseTag::ModeChoiceLogsums,
        fan_out: FanOut::RoundRobin,
        scope: QueueScope::AllQueues,
        barrier: Barrier::EveryMessage,
        next: Some(PhaseTag::WorkplaceLocation),
    },
    PhaseDefinition {
        tag: PhaseTag::WorkplaceLocation,
        fan_out: FanOut::RoundRobin,
        scope: QueueScope::AllQueues,
        barrier: Barrier::EveryMessage,
        next: Some(PhaseTag::ZoneDataUpdate),
    },
    PhaseDefinition {
        tag: PhaseTag::ZoneDataUpdate,
        fan_out: FanOut::Broadcast,
        scope: QueueScope::ZoneDataHolders,
        barrier: Barrier::EveryMessage,
        next: Some(PhaseTag::DestinationChoiceLogsums),
    },
    PhaseDefinition {
        tag: PhaseTag::DestinationChoiceLogsums,
        fan_out: FanOut::RoundRobin,
        scope: QueueScope::ZoneDataHolders,
        barrier: Barrier::EveryMessage,
        next: Some(PhaseTag::HouseholdProcessing),
    },
    PhaseDefinition {
        tag: PhaseTag::HouseholdProcessing,
        fan_out: FanOut::FlowControlled,
        scope: QueueScope::ZoneDataHolders,
        barrier: Barrier::EveryBlock,
        next: None,
    },
];

/// First phase of the pipeline
pub fn first_phase() -> PhaseTag {
    PHASE_TABLE[0].tag
}

/// Table row for a phase
pub fn definition(tag: PhaseTag) -> &'static PhaseDefinition {
    match tag {
        PhaseTag::ModeChoiceLogsums => &PHASE_TABLE[0],
        PhaseTag::WorkplaceLocation => &PHASE_TABLE[1],
        PhaseTag::ZoneDataUpdate => &PHASE_TABLE[2],
        PhaseTag::DestinationChoiceLogsums => &PHASE_TABLE[3],
        PhaseTag::HouseholdProcessing => &PHASE_TABLE[4],
    }
}
