//! Flow-control block scheduler
//!
//! Cuts a record set into blocks of at most `max_block_size` records and
//! hands them out in bursts. Each burst that leaves records behind marks its
//! second-to-last block (the only block, for bursts of one) with
//! `request_refill`, so the worker asks for more while it still has one
//! block of work queued.

use std::vec;

use ptdaf_common::config::FlowControlConfig;
use ptdaf_common::messages::Block;
use ptdaf_common::{Error, Result};

/// Block emission state for one record set
#[derive(Debug)]
pub struct BlockScheduler<R> {
    records: vec::IntoIter<R>,
    max_block_size: usize,
    initial_burst: usize,
    secondary_burst: usize,
    total_blocks: usize,
    next_sequence: usize,
}

impl<R> BlockScheduler<R> {
    pub fn new(records: Vec<R>, flow_control: &FlowControlConfig) -> Result<Self> {
        let FlowControlConfig {
            max_block_size,
            initial_burst,
            secondary_burst,
        } = *flow_control;

        if max_block_size == 0 || initial_burst == 0 || secondary_burst == 0 {
            return Err(Error::Config(format!(
                "Block size and burst sizes must be at least 1 (block {}, initial {}, secondary {})",
                max_block_size, initial_burst, secondary_burst
            )));
        }

        Ok(Self {
            total_blocks: records.len().div_ceil(max_block_size),
            records: records.into_iter(),
            max_block_size,
            initial_burst,
            secondary_burst,
            next_sequence: 0,
        })
    }

    /// Blocks the whole record set is cut into: ceil(R / B)
    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    /// Blocks handed out so far
    pub fn blocks_emitted(&self) -> usize {
        self.next_sequence
    }

    /// Records not yet placed in a block
    pub fn remaining(&self) -> usize {
        self.records.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.records.len() == 0
    }

    /// Initial burst for each queue, in queue order.
    ///
    /// Queues reached after the record set runs out get nothing and are
    /// left out of the result.
    pub fn initial_bursts(&mut self, queue_count: usize) -> Vec<(usize, Vec<Block<R>>)> {
        let mut bursts = Vec::new();
        for queue in 0..queue_count {
            if self.is_exhausted() {
                break;
            }
            let blocks = self.burst(self.initial_burst);
            bursts.push((queue, blocks));
        }
        bursts
    }

    /// Secondary burst for a queue that asked for more; empty once exhausted
    pub fn refill(&mut self) -> Vec<Block<R>> {
        self.burst(self.secondary_burst)
    }

    fn burst(&mut self, size: usize) -> Vec<Block<R>> {
        let count = size.min(self.remaining().div_ceil(self.max_block_size));
        let mut blocks: Vec<Block<R>> = (0..count).map(|_| self.next_block()).collect();

        if !self.is_exhausted() {
            if let Some(block) = blocks.get_mut(count.saturating_sub(2)) {
                block.request_refill = true;
            }
        }
        blocks
    }

    fn next_block(&mut self) -> Block<R> {
        let records: Vec<R> = self.records.by_ref().take(self.max_block_size).collect();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Block {
            sequence,
            records,
            request_refill: false,
        }
    }
}
