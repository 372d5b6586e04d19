//! Credentials boundary (spec.md §6). Loading/refreshing the token and
//! persisting cookies is an excluded collaborator; this crate only
//! defines the shape the GQL/WS clients need and a `tokens.json` reader,
//! mirroring the teacher's `auth::Token` + `Path::new("tokens.json")`
//! startup check in `main.rs`.

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSession {
    pub access_token: String,
    pub device_id: String,
    pub session_id: String,
    pub client_version: String,
    pub user_agent: String,
    /// The authenticated user's own id, the scope for every
    /// user-level PubSub topic (spec.md §4.1).
    pub user_id: String,
}

impl ClientSession {
    pub async fn load(path: &str) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading credentials file {path}"))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing credentials file {path}"))
    }

    pub fn bump_client_version(&mut self, new_version: String) {
        self.client_version = new_version;
    }
}
