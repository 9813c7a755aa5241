pub mod audit_log;
pub mod credentials;
pub mod error;
pub mod fetcher;
pub mod in_memory;
pub mod notifier;
pub mod pipeline;
pub mod storage_key;
pub mod storage_writer;
pub mod submission_worker;
