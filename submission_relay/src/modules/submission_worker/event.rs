use serde::Deserialize;
use serde_json::Value;

use crate::modules::{
    error::DecodeError,
    submission_worker::submission::SubmissionEvent,
};

// Lambda-style SNS event: {"Records":[{"Sns":{"Message":"..."}}]}
#[derive(Debug, Deserialize)]
struct SnsEvent {
    #[serde(rename = "Records")]
    records: Vec<SnsRecord>,
}

#[derive(Debug, Deserialize)]
struct SnsRecord {
    #[serde(rename = "Sns")]
    sns: SnsMessage,
}

// Also the shape of an SNS notification delivered through SQS
#[derive(Debug, Deserialize)]
struct SnsMessage {
    #[serde(rename = "Message")]
    message: String,
}

/// Decode a trigger envelope into a [`SubmissionEvent`].
///
/// Accepts a Lambda SNS event (first record only), an SNS notification
/// forwarded through SQS, or the bare submission JSON when the subscription
/// uses raw message delivery.
pub fn decode(raw: &str) -> Result<SubmissionEvent, DecodeError> {
    let outer: Value = serde_json::from_str(raw)?;
    let message = unwrap_envelope(outer)?;

    // Schema first: missing fields surface as Validation, not Json
    is_valid_submission(&message)?;

    Ok(serde_json::from_value(message)?)
}

fn unwrap_envelope(outer: Value) -> Result<Value, DecodeError> {
    if outer.get("Records").is_some() {
        let event: SnsEvent = serde_json::from_value(outer)?;
        let record = event
            .records
            .into_iter()
            .next()
            .ok_or_else(|| DecodeError::EmptyEnvelope("Records is empty".to_string()))?;
        return Ok(serde_json::from_str(&record.sns.message)?);
    }

    if outer.get("Type").and_then(Value::as_str) == Some("Notification") {
        let notification: SnsMessage = serde_json::from_value(outer)?;
        return Ok(serde_json::from_str(&notification.message)?);
    }

    Ok(outer)
}

// Helper function to validate the inner message against the submission schema
fn is_valid_submission(message: &Value) -> Result<(), DecodeError> {
    let control_schema = serde_json::json!({
        "type": "object",
        "properties": {
            "submissionUrl": { "type": "string", "minLength": 1 },
            "userEmail": { "type": "string", "minLength": 1 },
            "assignmentId": { "type": ["string", "null"] },
            "userId": { "type": ["string", "null"] }
        },
        "required": ["submissionUrl", "userEmail"]
    });

    jsonschema::validate(&control_schema, message)
        .map_err(|e| DecodeError::Validation(e.to_string()))
}
