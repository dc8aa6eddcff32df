//! # PT DAF Master (ptdaf-master)
//!
//! Phase-barrier dispatcher for the PT travel model pipeline.
//!
//! **Phases:** mode choice logsums, workplace location, zone data update,
//! destination choice logsums, household processing. Each phase fans work
//! out to the worker queues and waits for exactly the replies it expects
//! before the next one starts.
//!
//! **Flow control:** households are dispatched in bounded blocks; a flagged
//! block makes its worker ask for more before its queue runs dry.

pub mod cluster;
pub mod dispatcher;
pub mod marker;
pub mod phases;
pub mod population;
pub mod queues;
pub mod scheduler;

pub use cluster::{run_local_cluster, ClusterReport};
pub use dispatcher::{Dispatcher, PipelineState, PipelineSummary};
pub use population::Population;
pub use scheduler::BlockScheduler;
