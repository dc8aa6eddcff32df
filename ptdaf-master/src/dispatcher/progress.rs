//! Reply counting for the active phase and whole-run totals

use std::fmt;

use ptdaf_common::PhaseTag;

/// Barrier counters for one phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressCounters {
    pub phase: PhaseTag,
    /// Set once emission for the phase has finished
    pub expected: Option<usize>,
    pub replies_received: usize,
    pub records_processed: usize,
}

impl ProgressCounters {
    pub fn new(phase: PhaseTag) -> Self {
        Self {
            phase,
            expected: None,
            replies_received: 0,
            records_processed: 0,
        }
    }

    pub fn expect(&mut self, replies: usize) {
        self.expected = Some(replies);
    }

    pub fn record_reply(&mut self, records: usize) {
        self.replies_received += 1;
        self.records_processed += records;
    }

    /// True exactly when every expected reply has arrived
    pub fn threshold_reached(&self) -> bool {
        self.expected == Some(self.replies_received)
    }
}

impl fmt::Display for ProgressCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expected {
            Some(expected) => write!(f, "{}/{} replies", self.replies_received, expected),
            None => write!(f, "{} replies (emitting)", self.replies_received),
        }
    }
}

/// Totals reported when the pipeline drains
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub phases_completed: Vec<PhaseTag>,
    /// Persons with a work zone or kept aside as unemployed
    pub persons_located: usize,
    /// Households returned by block replies
    pub households_processed: usize,
    pub blocks_emitted: usize,
    pub refill_requests: usize,
    /// Replies flagged by workers as failed computations
    pub failed_replies: usize,
    /// Stragglers, malformed and unexpected messages
    pub discarded_messages: usize,
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} phases, {} persons located, {} households processed in {} blocks \
             ({} refills), {} failed replies, {} discarded messages",
            self.phases_completed.len(),
            self.persons_located,
            self.households_processed,
            self.blocks_emitted,
            self.refill_requests,
            self.failed_replies,
            self.discarded_messages
        )
    }
}
