use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_sesv2::{
    error::DisplayErrorContext,
    types::{Body, Content, Destination, EmailContent, Message},
    Client as SesClient,
};
use log::{error, info};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    config::TemplateConfig,
    modules::{
        audit_log::{AuditLogger, AuditStatus},
        error::NotifyError,
    },
};

// What happened to the artifact, with the detail the email reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Success { key: String },
    Failure { error: String },
}

// A fully rendered email, ready for a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

// Subject and body with {name}, {key} and {error} placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplatePreset {
    // One-line status
    Minimal,
    // Salutation, explanation, key path and signature
    #[default]
    Rich,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSet {
    pub success: MessageTemplate,
    pub failure: MessageTemplate,
}

const SUCCESS_SUBJECT: &str = "Assignment submitted successfully";
const FAILURE_SUBJECT: &str = "Assignment not submitted successfully";

impl TemplateSet {
    pub fn preset(preset: TemplatePreset) -> Self {
        match preset {
            TemplatePreset::Minimal => Self {
                success: MessageTemplate {
                    subject: SUCCESS_SUBJECT.to_string(),
                    body: "Your assignment was stored at {key}.".to_string(),
                },
                failure: MessageTemplate {
                    subject: FAILURE_SUBJECT.to_string(),
                    body: "Your assignment could not be stored: {error}".to_string(),
                },
            },
            TemplatePreset::Rich => Self {
                success: MessageTemplate {
                    subject: SUCCESS_SUBJECT.to_string(),
                    body: "Hi {name},\n\
                           Your assignment has been downloaded and saved to storage.\n\
                           It is stored under the following path:\n\n\
                           {key}\n\n\n\
                           Thank you,\n\
                           Submission relay"
                        .to_string(),
                },
                failure: MessageTemplate {
                    subject: FAILURE_SUBJECT.to_string(),
                    body: "Hi {name},\n\
                           An error occurred while downloading or saving your assignment.\n\
                           The error details are below.\n\
                           {error}\n\n\n\
                           Thank you,\n\
                           Submission relay"
                        .to_string(),
                },
            },
        }
    }

    // Preset with per-field overrides from the config file
    pub fn from_config(config: &TemplateConfig) -> Self {
        let mut set = Self::preset(config.preset);
        let overrides = [
            (&mut set.success.subject, &config.success_subject),
            (&mut set.success.body, &config.success_body),
            (&mut set.failure.subject, &config.failure_subject),
            (&mut set.failure.body, &config.failure_body),
        ];
        for (field, value) in overrides {
            if let Some(value) = value {
                *field = value.clone();
            }
        }
        set
    }

    pub fn render(&self, outcome: &NotificationOutcome, name: &str) -> (String, String) {
        let (template, key, error) = match outcome {
            NotificationOutcome::Success { key } => (&self.success, key.as_str(), ""),
            NotificationOutcome::Failure { error } => (&self.failure, "", error.as_str()),
        };
        let fill = |text: &str| {
            text.replace("{name}", name)
                .replace("{key}", key)
                .replace("{error}", error)
        };
        (fill(&template.subject), fill(&template.body))
    }
}

/// Transactional email provider.
///
/// Returns the provider's message id on success.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<String, NotifyError>;
}

#[derive(Deserialize)]
struct MailgunResponse {
    id: String,
}

// Mailgun HTTP API
#[derive(Clone)]
pub struct MailgunTransport {
    client: Client,
    api_base: String,
    domain: String,
    api_key: String,
}

impl MailgunTransport {
    pub fn new(client: Client, api_base: String, domain: String, api_key: String) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            domain,
            api_key,
        }
    }
}

#[async_trait]
impl MailTransport for MailgunTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<String, NotifyError> {
        let url = format!("{}/v3/{}/messages", self.api_base, self.domain);
        let response = self
            .client
            .post(url)
            .basic_auth("api", Some(&self.api_key))
            .form(&[
                ("from", mail.from.as_str()),
                ("to", mail.to.as_str()),
                ("subject", mail.subject.as_str()),
                ("text", mail.text.as_str()),
            ])
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let accepted: MailgunResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(accepted.id)
    }
}

// AWS SES v2, simple content
#[derive(Clone)]
pub struct SesTransport {
    client: SesClient,
}

impl SesTransport {
    pub fn new(client: SesClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MailTransport for SesTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<String, NotifyError> {
        let content = |data: &str| {
            Content::builder()
                .data(data)
                .build()
                .map_err(|e| NotifyError::Transport(e.to_string()))
        };

        let message = Message::builder()
            .subject(content(&mail.subject)?)
            .body(Body::builder().text(content(&mail.text)?).build())
            .build();

        let output = self
            .client
            .send_email()
            .from_email_address(&mail.from)
            .destination(Destination::builder().to_addresses(&mail.to).build())
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .map_err(|e| NotifyError::Transport(DisplayErrorContext(&e).to_string()))?;

        Ok(output.message_id().unwrap_or_default().to_string())
    }
}

/// Sends the status email and audits the attempt.
///
/// Every attempt produces exactly one audit record: `Sent` when the
/// transport accepted the message, `Error` when it did not. A send failure
/// is still returned so the caller can log it, but it never changes what
/// the pipeline reports.
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn MailTransport>,
    templates: TemplateSet,
    sender: String,
    audit: AuditLogger,
}

impl Notifier {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        templates: TemplateSet,
        sender: String,
        audit: AuditLogger,
    ) -> Self {
        Self {
            transport,
            templates,
            sender,
            audit,
        }
    }

    pub async fn notify(
        &self,
        outcome: &NotificationOutcome,
        recipient: &str,
        name: &str,
    ) -> Result<String, NotifyError> {
        let (subject, text) = self.templates.render(outcome, name);
        let mail = OutgoingMail {
            from: self.sender.clone(),
            to: recipient.to_string(),
            subject,
            text,
        };

        match self.transport.send(&mail).await {
            Ok(id) => {
                info!("Email sent to {}: {}", recipient, id);
                self.audit.record(AuditStatus::Sent, &mail.text, recipient).await;
                Ok(id)
            }
            Err(e) => {
                error!("Error sending email to {}: {}", recipient, e);
                self.audit.record(AuditStatus::Error, &mail.text, recipient).await;
                Err(e)
            }
        }
    }
}
