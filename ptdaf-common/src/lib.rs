//! # PT DAF Common Library
//!
//! Shared code for the phase-barrier dispatcher and its workers:
//! - Message protocol (envelope, tagged message bodies, domain records)
//! - Wire codec
//! - Named-queue message channel and the in-process broker
//! - Configuration loading and validation
//! - One-time shared model context

pub mod channel;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod messages;

pub use channel::{Inbox, LocalBroker, MessageChannel, QueueName};
pub use config::DafConfig;
pub use context::ModelContext;
pub use error::{Error, Result};
pub use messages::{Envelope, MessageBody, PhaseTag};
