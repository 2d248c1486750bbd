//! Per-subject admission control
//!
//! Limits how often a subject may have a generation delivered. The decision
//! is a pure function of the cooldown policy and the subject's last usage;
//! usage is recorded only after a confirmed successful delivery so a failed
//! attempt never consumes the subject's window.
//!
//! Subject lifecycle:
//! 1. First request creates the record (`touch`)
//! 2. `try_admit` allows or denies against the cooldown window
//! 3. Successful delivery calls `record`, starting a new window
//! 4. Failure calls `release`, leaving the window untouched

pub mod controller;
pub mod error;
pub mod policy;
pub mod store;

pub use controller::{AdmissionController, SubjectProfile, SubjectStats, UsageSummary};
pub use error::{Error, Result};
pub use policy::{Admission, CooldownPolicy};
pub use store::{JsonFileStore, MemoryStore, Mutation, SubjectRecord, SubjectStore};
