//! Grade registration with low-grade alerting for guardians.
//!
//! [`workflow::RegisterGradeWorkflow`] persists one grade and, when it falls
//! below its scale's threshold, records an alert and queues one email per
//! guardian in the outbox. [`batch::BatchRegisterWorkflow`] runs a whole
//! gradebook submission through it with bounded concurrency.

pub mod batch;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod http;
pub mod import;
pub mod memory;
pub mod message;
pub mod models;
pub mod store;
pub mod threshold;
pub mod workflow;

pub use error::{Error, ErrorKind, Result};
