//! # PT DAF Worker Library (ptdaf-worker)
//!
//! Stateless executors bound to one named queue each.
//!
//! **Purpose:** Receive a phase-tagged work message, run the collaborator
//! computation for it and send exactly one reply, whatever the computation
//! does. Also hosts the terminal results consumer.
//!
//! **Concurrency:** One message at a time per queue; independent queues run
//! in parallel as separate tasks.

pub mod model;
pub mod results;
pub mod worker;

pub use model::{ReferenceModel, TravelModel};
pub use results::ResultsWriter;
pub use worker::{Worker, WorkerStats};
