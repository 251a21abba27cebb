//! Downstream resource API client
//!
//! Calls `GET <api_url>/me` with the signed-in user's bearer token and reads
//! the three profile fields the CLI prints.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SigninError};

/// Profile of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,

    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub mail: Option<String>,
}

/// Minimal client for the profile endpoint.
#[derive(Debug, Clone)]
pub struct ProfileClient {
    http: reqwest::Client,
    api_url: String,
}

impl ProfileClient {
    /// Creates a client for `api_url`, e.g. `https://graph.microsoft.com/v1.0`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Full URL of the profile endpoint.
    pub fn me_url(&self) -> String {
        format!("{}/me", self.api_url)
    }

    /// Fetches the signed-in user's profile.
    ///
    /// # Errors
    ///
    /// Returns [`SigninError::Graph`] on a non-2xx status (with the status
    /// and body) or when the body is not a profile.
    pub async fn get_me(&self, access_token: &str) -> Result<UserProfile> {
        let url = self.me_url();
        tracing::debug!("Fetching user profile from {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            return Err(SigninError::Graph(format!("GET {url} returned {status}: {body}")).into());
        }

        Ok(resp
            .json::<UserProfile>()
            .await
            .map_err(|e| SigninError::Graph(format!("failed to parse profile: {e}")))?)
    }
}
