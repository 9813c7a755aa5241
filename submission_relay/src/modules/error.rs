use thiserror::Error;

// The trigger payload could not be turned into a submission.
// The only error allowed to escape the pipeline: without a decoded
// payload there is no recipient to notify.
#[derive(Debug, Error)]
pub enum DecodeError {
    // Envelope or inner message is not JSON
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    // Envelope shape recognised but the wrapped message is missing
    #[error("envelope carries no message: {0}")]
    EmptyEnvelope(String),

    // Payload parsed but does not match the submission schema
    // Kept as String so the error stays free of jsonschema's lifetimes
    #[error("submission failed validation: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("artifact request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("artifact request to {url} returned {status}")]
    Status { url: String, status: u16 },

    #[error("artifact at {url} exceeds the {limit} byte limit")]
    TooLarge { url: String, limit: u64 },
}

#[derive(Debug, Error)]
pub enum StorageError {
    // Key material could not be decoded or parsed
    #[error("invalid storage credentials: {0}")]
    Credentials(String),

    // Token exchange or upload refused for auth reasons (401/403)
    #[error("storage access denied ({status}): {message}")]
    Denied { status: u16, message: String },

    // Any other non-success answer from the storage service
    #[error("storage write rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("storage transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("mail provider rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("mail transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
#[error("audit write to {table} failed: {message}")]
pub struct AuditError {
    pub table: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("required environment variable {0} is not set")]
    MissingVar(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// Failures of the queue plumbing around an invocation, never of the
// invocation itself
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("error receiving messages: {0}")]
    Receive(String),

    #[error("error acknowledging message: {0}")]
    Acknowledge(String),

    #[error("message has no {0}")]
    MissingField(&'static str),
}
