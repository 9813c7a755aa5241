use std::sync::Arc;

use bytes::Bytes;
use log::{error, info, warn};
use serde::Serialize;

use crate::modules::{
    audit_log::{AuditLogger, AuditStore},
    error::{ConfigError, DecodeError},
    fetcher::ArtifactFetcher,
    notifier::{MailTransport, NotificationOutcome, Notifier, TemplateSet},
    storage_key::{derive_key, Clock, KeyScheme, SystemClock},
    storage_writer::ArtifactStore,
    submission_worker::{event, submission::SubmissionEvent},
};

pub const SUCCESS_MESSAGE: &str = "Zip file uploaded successfully.";
pub const FAILURE_MESSAGE: &str = "Internal Server Error";

// Outcome of one invocation as reported to the triggering platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationResult {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: ResultBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResultBody {
    Message { message: String },
    Error { error: String },
}

impl InvocationResult {
    pub fn success() -> Self {
        Self {
            status_code: 200,
            body: ResultBody::Message {
                message: SUCCESS_MESSAGE.to_string(),
            },
        }
    }

    pub fn failure() -> Self {
        Self {
            status_code: 500,
            body: ResultBody::Error {
                error: FAILURE_MESSAGE.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

// Where an invocation is between decode and Done
enum Stage {
    Fetching,
    Storing(Bytes),
    NotifyingSuccess,
    NotifyingFailure(String),
}

/// Fetch, store, notify, audit.
///
/// One pipeline is shared by every invocation. It holds no per-invocation
/// state: the outcome, key and error text travel through the call chain.
#[derive(Clone)]
pub struct Pipeline {
    fetcher: Arc<dyn ArtifactFetcher>,
    store: Arc<dyn ArtifactStore>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    key_scheme: KeyScheme,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Decode a trigger envelope and run it.
    ///
    /// A payload that cannot be decoded is the only error returned: there
    /// is nobody to notify about it.
    pub async fn handle(&self, raw: &str) -> Result<InvocationResult, DecodeError> {
        let event = event::decode(raw)?;
        Ok(self.run(&event).await)
    }

    pub async fn run(&self, event: &SubmissionEvent) -> InvocationResult {
        // The key does not depend on the artifact, derive it up front
        let key = derive_key(event, self.clock.now(), self.key_scheme);
        let mut stage = Stage::Fetching;

        loop {
            stage = match stage {
                Stage::Fetching => {
                    info!("Fetching artifact from {}", event.submission_url);
                    match self.fetcher.fetch(&event.submission_url).await {
                        Ok(data) => Stage::Storing(data),
                        Err(e) => {
                            warn!("Fetch failed for {}: {}", event.submission_url, e);
                            Stage::NotifyingFailure(e.to_string())
                        }
                    }
                }
                Stage::Storing(data) => match self.store.put(&key, data).await {
                    Ok(()) => {
                        info!("File {} uploaded to {}.", key, self.store.bucket());
                        Stage::NotifyingSuccess
                    }
                    Err(e) => {
                        warn!("Storing {} in {} failed: {}", key, self.store.bucket(), e);
                        Stage::NotifyingFailure(e.to_string())
                    }
                },
                Stage::NotifyingSuccess => {
                    self.notify(event, NotificationOutcome::Success { key: key.to_string() })
                        .await;
                    return InvocationResult::success();
                }
                Stage::NotifyingFailure(error) => {
                    self.notify(event, NotificationOutcome::Failure { error }).await;
                    return InvocationResult::failure();
                }
            };
        }
    }

    // Notification failures are already audited by the notifier and
    // must not change the invocation's result
    async fn notify(&self, event: &SubmissionEvent, outcome: NotificationOutcome) {
        let name = event.display_name();
        if let Err(e) = self.notifier.notify(&outcome, &event.user_email, &name).await {
            error!("Status email to {} not delivered: {}", event.user_email, e);
        }
    }
}

/// Assembles a [`Pipeline`] from its collaborators.
///
/// Key scheme, templates and transport are the strategies that tell one
/// deployment apart from another.
#[derive(Default)]
pub struct PipelineBuilder {
    fetcher: Option<Arc<dyn ArtifactFetcher>>,
    store: Option<Arc<dyn ArtifactStore>>,
    transport: Option<Arc<dyn MailTransport>>,
    audit_store: Option<Arc<dyn AuditStore>>,
    sender: Option<String>,
    templates: Option<TemplateSet>,
    clock: Option<Arc<dyn Clock>>,
    key_scheme: KeyScheme,
}

impl PipelineBuilder {
    pub fn fetcher(mut self, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn audit_store(mut self, audit_store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(audit_store);
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn templates(mut self, templates: TemplateSet) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn key_scheme(mut self, key_scheme: KeyScheme) -> Self {
        self.key_scheme = key_scheme;
        self
    }

    pub fn build(self) -> Result<Pipeline, ConfigError> {
        let missing = |what: &str| ConfigError::Invalid(format!("pipeline has no {}", what));

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);
        let audit = AuditLogger::new(self.audit_store.ok_or_else(|| missing("audit store"))?, clock.clone());
        let notifier = Notifier::new(
            self.transport.ok_or_else(|| missing("mail transport"))?,
            self.templates.unwrap_or_else(|| TemplateSet::preset(Default::default())),
            self.sender.ok_or_else(|| missing("sender address"))?,
            audit,
        );

        Ok(Pipeline {
            fetcher: self.fetcher.ok_or_else(|| missing("artifact fetcher"))?,
            store: self.store.ok_or_else(|| missing("artifact store"))?,
            notifier,
            clock,
            key_scheme: self.key_scheme,
        })
    }
}
