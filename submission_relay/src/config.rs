use serde::Deserialize;
use std::fs;

use crate::modules::{
    error::ConfigError,
    notifier::TemplatePreset,
    storage_key::KeyScheme,
};

// Non-secret settings, read from Config.toml
#[derive(Debug, Deserialize)]
pub struct Config {
    pub submission_worker: SubmissionWorkerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub aws: AwsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionWorkerConfig {
    pub queue_url: String,
    pub visibility_timeout: i32,
    pub max_number_of_messages: i32,
    // Long-poll wait per receive call, seconds
    #[serde(default = "default_wait_time")]
    pub wait_time_seconds: i32,
    // Pause after an empty or failed receive, seconds
    pub polling_interval: u64,
    // Number of polling loops, defaults to the CPU count
    #[serde(default)]
    pub concurrency: Option<usize>,
    // Deliveries of a failing message before it is dropped
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
    // Seconds a failed message stays hidden before redelivery
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: i32,
}

fn default_wait_time() -> i32 {
    20
}

fn default_max_receive_count() -> u32 {
    3
}

fn default_retry_delay() -> i32 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    // Artifacts are held in memory in full, anything larger is refused
    pub max_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub key_scheme: KeyScheme,
    #[serde(default = "default_upload_base")]
    pub upload_base: String,
    // Covers token exchange and upload; sized for artifacts up to fetch.max_bytes
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_scheme: KeyScheme::default(),
            upload_base: default_upload_base(),
            upload_timeout_secs: default_upload_timeout(),
        }
    }
}

fn default_upload_timeout() -> u64 {
    300
}

fn default_upload_base() -> String {
    "https://storage.googleapis.com".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailTransportKind {
    #[default]
    Mailgun,
    Ses,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub transport: MailTransportKind,
    #[serde(default = "default_mailgun_api_base")]
    pub mailgun_api_base: String,
    #[serde(default)]
    pub templates: TemplateConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            transport: MailTransportKind::default(),
            mailgun_api_base: default_mailgun_api_base(),
            templates: TemplateConfig::default(),
        }
    }
}

fn default_mailgun_api_base() -> String {
    "https://api.mailgun.net".to_string()
}

// Preset plus optional per-field overrides
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateConfig {
    #[serde(default)]
    pub preset: TemplatePreset,
    pub success_subject: Option<String>,
    pub success_body: Option<String>,
    pub failure_subject: Option<String>,
    pub failure_body: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AwsConfig {
    pub region: Option<String>,
    // e.g. http://localhost:4566 for LocalStack
    pub endpoint_url: Option<String>,
}

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(contents)?;
    if config.fetch.max_bytes == 0 {
        return Err(ConfigError::Invalid("fetch.max_bytes must be positive".to_string()));
    }
    if config.submission_worker.max_receive_count == 0 {
        return Err(ConfigError::Invalid(
            "submission_worker.max_receive_count must be positive".to_string(),
        ));
    }
    // SQS caps visibility timeouts at 12 hours
    if !(0..=43_200).contains(&config.submission_worker.retry_delay_secs) {
        return Err(ConfigError::Invalid(
            "submission_worker.retry_delay_secs must be within 0..=43200".to_string(),
        ));
    }
    if config.storage.upload_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "storage.upload_timeout_secs must be positive".to_string(),
        ));
    }
    if config.submission_worker.concurrency == Some(0) {
        return Err(ConfigError::Invalid(
            "submission_worker.concurrency must be positive".to_string(),
        ));
    }
    Ok(config)
}

#[derive(Clone)]
pub struct MailgunSecrets {
    pub domain: String,
    pub api_key: String,
}

// Deployment identifiers and credentials, read from the environment.
// Everything the selected transport needs is checked at startup.
#[derive(Clone)]
pub struct Secrets {
    pub bucket: String,
    pub project: String,
    // Base64-encoded service-account JSON
    pub private_key: String,
    pub audit_table: String,
    pub sender: String,
    pub mailgun: Option<MailgunSecrets>,
}

impl Secrets {
    pub fn from_env(transport: MailTransportKind) -> Result<Self, ConfigError> {
        Self::from_lookup(transport, |name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(transport: MailTransportKind, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::MissingVar(name))
        };

        let (sender, mailgun) = match transport {
            MailTransportKind::Mailgun => (
                require("MG_SENDER_MAIL_ID")?,
                Some(MailgunSecrets {
                    domain: require("MG_APP_DOMAIN")?,
                    api_key: require("MG_API_KEY")?,
                }),
            ),
            MailTransportKind::Ses => (require("SES_SENDER_MAIL_ID")?, None),
        };

        Ok(Self {
            bucket: require("GCP_BUCKET_NAME")?,
            project: require("GCP_PROJECT_NAME")?,
            private_key: require("GCP_PRIVATE_KEY")?,
            audit_table: require("DYNAMO_DB_NAME")?,
            sender,
            mailgun,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
        [submission_worker]
        queue_url = "http://localhost:4566/000000000000/submissions"
        visibility_timeout = 120
        max_number_of_messages = 10
        polling_interval = 1
    "#;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn full_env() -> HashMap<String, String> {
        env(&[
            ("GCP_BUCKET_NAME", "submissions"),
            ("GCP_PROJECT_NAME", "relay-project"),
            ("GCP_PRIVATE_KEY", "e30="),
            ("DYNAMO_DB_NAME", "emails"),
            ("MG_SENDER_MAIL_ID", "relay@mg.example.com"),
            ("MG_APP_DOMAIN", "mg.example.com"),
            ("MG_API_KEY", "key-123"),
            ("SES_SENDER_MAIL_ID", "relay@example.com"),
        ])
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.submission_worker.wait_time_seconds, 20);
        assert_eq!(config.submission_worker.concurrency, None);
        assert_eq!(config.submission_worker.max_receive_count, 3);
        assert_eq!(config.submission_worker.retry_delay_secs, 60);
        assert_eq!(config.storage.upload_timeout_secs, 300);
        assert_eq!(config.fetch.max_bytes, 100 * 1024 * 1024);
        assert_eq!(config.storage.key_scheme, KeyScheme::Partitioned);
        assert_eq!(config.notification.transport, MailTransportKind::Mailgun);
        assert_eq!(config.notification.templates.preset, TemplatePreset::Rich);
        assert!(config.aws.endpoint_url.is_none());
    }

    #[test]
    fn reads_strategy_selection() {
        let contents = format!(
            "{}\n{}",
            MINIMAL,
            r#"
            [storage]
            key_scheme = "flat"

            [notification]
            transport = "ses"

            [notification.templates]
            preset = "minimal"
            failure_subject = "Upload failed"
            "#
        );
        let config = parse_config(&contents).unwrap();
        assert_eq!(config.storage.key_scheme, KeyScheme::Flat);
        assert_eq!(config.notification.transport, MailTransportKind::Ses);
        assert_eq!(config.notification.templates.preset, TemplatePreset::Minimal);
        assert_eq!(
            config.notification.templates.failure_subject.as_deref(),
            Some("Upload failed")
        );
    }

    #[test]
    fn reads_retry_and_upload_limits() {
        let contents = MINIMAL.replace(
            "polling_interval = 1",
            "polling_interval = 1\nmax_receive_count = 5\nretry_delay_secs = 300",
        ) + "\n[storage]\nupload_timeout_secs = 900\n";
        let config = parse_config(&contents).unwrap();
        assert_eq!(config.submission_worker.max_receive_count, 5);
        assert_eq!(config.submission_worker.retry_delay_secs, 300);
        assert_eq!(config.storage.upload_timeout_secs, 900);
    }

    #[test]
    fn rejects_zero_receive_count() {
        let contents = MINIMAL.replace("polling_interval = 1", "polling_interval = 1\nmax_receive_count = 0");
        assert!(matches!(parse_config(&contents), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_retry_delay_beyond_visibility_cap() {
        let contents = MINIMAL.replace("polling_interval = 1", "polling_interval = 1\nretry_delay_secs = 50000");
        assert!(matches!(parse_config(&contents), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_size_cap() {
        let contents = format!("{}\n[fetch]\ntimeout_secs = 5\nmax_bytes = 0\n", MINIMAL);
        assert!(matches!(parse_config(&contents), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_worker_section_fails() {
        assert!(matches!(parse_config(""), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn mailgun_secrets_resolve() {
        let vars = full_env();
        let secrets = Secrets::from_lookup(MailTransportKind::Mailgun, |k| vars.get(k).cloned()).unwrap();
        assert_eq!(secrets.sender, "relay@mg.example.com");
        assert_eq!(secrets.mailgun.unwrap().domain, "mg.example.com");
    }

    #[test]
    fn ses_does_not_need_mailgun_vars() {
        let mut vars = full_env();
        vars.remove("MG_API_KEY");
        vars.remove("MG_APP_DOMAIN");
        let secrets = Secrets::from_lookup(MailTransportKind::Ses, |k| vars.get(k).cloned()).unwrap();
        assert_eq!(secrets.sender, "relay@example.com");
        assert!(secrets.mailgun.is_none());
    }

    #[test]
    fn missing_var_fails_fast() {
        let mut vars = full_env();
        vars.remove("DYNAMO_DB_NAME");
        let result = Secrets::from_lookup(MailTransportKind::Mailgun, |k| vars.get(k).cloned());
        assert!(matches!(result, Err(ConfigError::MissingVar("DYNAMO_DB_NAME"))));
    }

    #[test]
    fn blank_var_counts_as_missing() {
        let mut vars = full_env();
        vars.insert("GCP_BUCKET_NAME".to_string(), "  ".to_string());
        let result = Secrets::from_lookup(MailTransportKind::Ses, |k| vars.get(k).cloned());
        assert!(matches!(result, Err(ConfigError::MissingVar("GCP_BUCKET_NAME"))));
    }
}
