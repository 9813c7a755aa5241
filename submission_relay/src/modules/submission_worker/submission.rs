use serde::{Deserialize, Serialize};

// A decoded submission notification. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionEvent {
    // Where the submitted artifact can be downloaded from
    pub submission_url: String,
    // Submitter, recipient of the status email
    pub user_email: String,
    // Only present in partitioned deployments
    #[serde(default)]
    pub assignment_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl SubmissionEvent {
    pub fn display_name(&self) -> String {
        display_name(&self.user_email)
    }
}

/// Salutation name derived from an email address.
///
/// Takes the local part, keeps everything before the first `.` and
/// upper-cases the first character: `jane.doe@x.com` becomes `Jane`,
/// `bob@x.com` becomes `Bob`.
pub fn display_name(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let first = local.split('.').next().unwrap_or_default();

    let mut chars = first.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
