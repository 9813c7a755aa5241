//! Relay from "a submission was made" to "the artifact is stored and the
//! submitter knows it".
//!
//! A submission notification arrives on a queue, the artifact it points at
//! is downloaded and written to object storage under a time-qualified key,
//! and the submitter gets a status email. Every email attempt is audited.

pub mod config;
pub mod modules;
