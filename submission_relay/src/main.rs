use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_sesv2::Client as SesClient;
use aws_sdk_sqs::Client as SQSClient;
use aws_types::region::Region;
use log::{error, info, warn};
use std::{error::Error, process, sync::Arc, time::Duration};
use submission_relay::{
    config::{self, Config, MailTransportKind, Secrets},
    modules::{
        audit_log::DynamoAuditStore,
        credentials::ServiceAccountKey,
        error::ConfigError,
        fetcher::HttpFetcher,
        notifier::{MailTransport, MailgunTransport, SesTransport, TemplateSet},
        pipeline::Pipeline,
        storage_writer::GcsStore,
        submission_worker::SubmissionWorker,
    },
};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("Startup failed: {}", e);
        process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    // Load the configuration for the worker and pipeline from Config.toml
    let path = std::env::var("RELAY_CONFIG")
        .unwrap_or_else(|_| "submission_relay/Config.toml".to_string());
    let config = config::load_config(&path)?;
    let secrets = Secrets::from_env(config.notification.transport)?;

    // Decode the key once so bad key material stops the process here
    // instead of failing every upload
    {
        let key = ServiceAccountKey::decode(&secrets.private_key)?;
        if let Some(project) = key.project_id.as_deref().filter(|p| *p != secrets.project) {
            warn!(
                "Service account belongs to project {}, GCP_PROJECT_NAME is {}",
                project, secrets.project
            );
        }
    }

    let sdk_config = load_aws_config(&config).await;
    let pipeline = build_pipeline(&config, &secrets, &sdk_config)?;

    let worker = SubmissionWorker::new(
        SQSClient::new(&sdk_config),
        pipeline,
        config.submission_worker,
    );
    info!("Relaying submissions into bucket {}", secrets.bucket);
    worker.run().await;
    Ok(())
}

async fn load_aws_config(config: &Config) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &config.aws.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(endpoint) = &config.aws.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    loader.load().await
}

fn build_pipeline(
    config: &Config,
    secrets: &Secrets,
    sdk_config: &SdkConfig,
) -> Result<Pipeline, Box<dyn Error>> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    // Uploads carry whole artifacts and get their own, longer timeout
    let upload_http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.storage.upload_timeout_secs))
        .build()?;

    let transport: Arc<dyn MailTransport> = match config.notification.transport {
        MailTransportKind::Mailgun => {
            let mailgun = secrets
                .mailgun
                .clone()
                .ok_or(ConfigError::MissingVar("MG_API_KEY"))?;
            Arc::new(MailgunTransport::new(
                http,
                config.notification.mailgun_api_base.clone(),
                mailgun.domain,
                mailgun.api_key,
            ))
        }
        MailTransportKind::Ses => Arc::new(SesTransport::new(SesClient::new(sdk_config))),
    };

    let pipeline = Pipeline::builder()
        .fetcher(Arc::new(HttpFetcher::new(&config.fetch)?))
        .store(Arc::new(GcsStore::new(
            upload_http,
            secrets.bucket.clone(),
            secrets.private_key.clone(),
            config.storage.upload_base.clone(),
        )))
        .transport(transport)
        .audit_store(Arc::new(DynamoAuditStore::new(
            DynamoClient::new(sdk_config),
            secrets.audit_table.clone(),
        )))
        .sender(secrets.sender.clone())
        .templates(TemplateSet::from_config(&config.notification.templates))
        .key_scheme(config.storage.key_scheme)
        .build()?;

    Ok(pipeline)
}
