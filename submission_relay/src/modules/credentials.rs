use base64::{engine::general_purpose, Engine};
use jwt_simple::{
    algorithms::{RS256KeyPair, RSAKeyPairLike},
    claims::Claims,
    prelude::Duration,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::modules::error::StorageError;

const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

// Service-account key file, as issued by the cloud console.
// Only lives for the duration of the call that needs it.
#[derive(Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Serialize, Deserialize)]
struct ScopeClaim {
    scope: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl ServiceAccountKey {
    // Decode the base64-wrapped JSON key from the environment
    pub fn decode(encoded: &str) -> Result<Self, StorageError> {
        let raw = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| StorageError::Credentials(format!("key is not base64: {}", e)))?;
        serde_json::from_slice(&raw)
            .map_err(|e| StorageError::Credentials(format!("key is not a service account JSON: {}", e)))
    }

    /// Exchange a signed JWT assertion for an OAuth2 bearer token.
    pub async fn access_token(&self, client: &Client) -> Result<String, StorageError> {
        let assertion = self.assertion()?;

        let response = client
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Denied {
                status: status.as_u16(),
                message,
            });
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    fn assertion(&self) -> Result<String, StorageError> {
        let key_pair = RS256KeyPair::from_pem(&self.private_key)
            .map_err(|e| StorageError::Credentials(format!("unusable private key: {}", e)))?;

        let claims = Claims::with_custom_claims(
            ScopeClaim {
                scope: STORAGE_SCOPE.to_string(),
            },
            Duration::from_mins(60),
        )
        .with_issuer(&self.client_email)
        .with_audience(&self.token_uri);

        key_pair
            .sign(claims)
            .map_err(|e| StorageError::Credentials(format!("could not sign assertion: {}", e)))
    }
}
