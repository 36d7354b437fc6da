//! Identity provider client.
//!
//! Given a bearer token, resolves the authenticated user plus the first page
//! of followers and following (bounded at 100 each; larger graphs are
//! truncated - a documented limitation). The resolver is stateless; any
//! failure degrades the login to guest mode at the call site.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Resolved identity: stable id, login, avatar, and the first page of the
/// contact graph.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub id: i64,
    pub login: String,
    pub avatar: Option<String>,
    pub followers: Vec<i64>,
    pub following: Vec<i64>,
}

/// Identity resolution errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token rejected by identity provider (status {0})")]
    Unauthorized(u16),
}

/// Token validation against the external identity provider.
///
/// A trait so tests substitute a canned resolver without the network.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer token into an identity record.
    async fn resolve(&self, token: &str) -> Result<ResolvedIdentity, IdentityError>;
}

/// Page size for follower/following reads. One page only; see module docs.
const GRAPH_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: i64,
    login: String,
    #[serde(default)]
    avatar_url: Option<String>,
}

/// HTTP implementation against a GitHub-style REST API.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityProvider {
    /// Build a provider client with the configured base URL and timeout.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("glimpsed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
    ) -> Result<T, IdentityError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(IdentityError::Unauthorized(status.as_u16()));
        }
        let body = response.error_for_status()?.json::<T>().await?;
        Ok(body)
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn resolve(&self, token: &str) -> Result<ResolvedIdentity, IdentityError> {
        let user: ApiUser = self.get_json("/user", token).await?;

        // First page only. Graph edges beyond the page are simply not seen.
        let followers_path = format!("/user/followers?per_page={GRAPH_PAGE}");
        let following_path = format!("/user/following?per_page={GRAPH_PAGE}");
        let followers: Vec<ApiUser> = self.get_json(&followers_path, token).await.unwrap_or_else(|e| {
            debug!(error = %e, "follower page fetch failed, treating as empty");
            Vec::new()
        });
        let following: Vec<ApiUser> = self.get_json(&following_path, token).await.unwrap_or_else(|e| {
            debug!(error = %e, "following page fetch failed, treating as empty");
            Vec::new()
        });

        Ok(ResolvedIdentity {
            id: user.id,
            login: user.login,
            avatar: user.avatar_url,
            followers: followers.into_iter().map(|u| u.id).collect(),
            following: following.into_iter().map(|u| u.id).collect(),
        })
    }
}

/// Canned resolver for tests: a token map, with everything else rejected.
pub struct StaticIdentityProvider {
    identities: std::collections::HashMap<String, ResolvedIdentity>,
}

impl StaticIdentityProvider {
    /// Empty provider - every token is rejected, all logins degrade to guest.
    pub fn empty() -> Self {
        Self {
            identities: std::collections::HashMap::new(),
        }
    }

    /// Register an identity under a token.
    pub fn with(mut self, token: &str, identity: ResolvedIdentity) -> Self {
        self.identities.insert(token.to_string(), identity);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve(&self, token: &str) -> Result<ResolvedIdentity, IdentityError> {
        self.identities
            .get(token)
            .cloned()
            .ok_or(IdentityError::Unauthorized(401))
    }
}
