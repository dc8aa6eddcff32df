//! Message protocol shared by the dispatcher, the workers and the results writer
//!
//! Every message travels as an [`Envelope`] whose body is an exhaustively
//! matched [`MessageBody`]. Bodies serialize with an explicit `type` tag so
//! the wire form stays readable and stable.

mod phase_types;
mod record_types;

pub use phase_types::{PhaseReply, PhaseTag, PhaseWork, Purpose, SegmentKey, TOTAL_SEGMENTS};
pub use record_types::{Block, Household, Occupation, Person, ZoneData};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::QueueName;

/// Unit of transfer between queues. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message id, for log correlation
    pub id: Uuid,
    /// Queue the sender listens on (replies go back there)
    pub sender: QueueName,
    pub body: MessageBody,
}

impl Envelope {
    pub fn new(sender: QueueName, body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            body,
        }
    }
}

/// Message bodies
///
/// Work messages flow dispatcher -> worker, replies flow worker -> dispatcher.
/// The results variants connect the dispatcher with the terminal consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageBody {
    /// Work for a round-robin phase
    PhaseWork { work: PhaseWork },

    /// Reply for a round-robin phase
    PhaseReply {
        phase: PhaseTag,
        reply: PhaseReply,
        /// Collaborator failed; payload is empty or partial
        #[serde(default)]
        failed: bool,
    },

    /// Zone totals sent to every worker queue
    BroadcastUpdate { zone_data: ZoneData },

    /// One acknowledgment per broadcast queue
    BroadcastAck {
        #[serde(default)]
        failed: bool,
    },

    /// One block of households
    BlockWork { block: Block<Household> },

    /// Reply for one block; `request_refill` echoes the block's flag
    BlockReply {
        sequence: usize,
        households: Vec<Household>,
        processed_count: usize,
        request_refill: bool,
        #[serde(default)]
        failed: bool,
    },

    /// Processed households forwarded to the results writer
    ResultsBatch { households: Vec<Household> },

    /// All blocks have been processed
    PipelineDone { households: usize },

    /// Results writer acknowledgment of `PipelineDone`
    ResultsWritten { households: usize },
}

impl MessageBody {
    /// Phase a work or reply message belongs to; `None` for results traffic
    pub fn phase(&self) -> Option<PhaseTag> {
        match self {
            MessageBody::PhaseWork { work } => Some(work.phase()),
            MessageBody::PhaseReply { phase, .. } => Some(*phase),
            MessageBody::BroadcastUpdate { .. } | MessageBody::BroadcastAck { .. } => {
                Some(PhaseTag::ZoneDataUpdate)
            }
            MessageBody::BlockWork { .. } | MessageBody::BlockReply { .. } => {
                Some(PhaseTag::HouseholdProcessing)
            }
            MessageBody::ResultsBatch { .. }
            | MessageBody::PipelineDone { .. }
            | MessageBody::ResultsWritten { .. } => None,
        }
    }

    /// Wire tag name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            MessageBody::PhaseWork { .. } => "PHASE_WORK",
            MessageBody::PhaseReply { .. } => "PHASE_REPLY",
            MessageBody::BroadcastUpdate { .. } => "BROADCAST_UPDATE",
            MessageBody::BroadcastAck { .. } => "BROADCAST_ACK",
            MessageBody::BlockWork { .. } => "BLOCK_WORK",
            MessageBody::BlockReply { .. } => "BLOCK_REPLY",
            MessageBody::ResultsBatch { .. } => "RESULTS_BATCH",
            MessageBody::PipelineDone { .. } => "PIPELINE_DONE",
            MessageBody::ResultsWritten { .. } => "RESULTS_WRITTEN",
        }
    }
}
