//! Directory client for the admin REST API.

use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Response, StatusCode};
use tokio::sync::RwLock;
use tracing::debug;

use async_trait::async_trait;

use groupsync_directory::{
    DirectoryError, DirectoryReader, DirectoryResult, DirectoryWriter, GroupNode, GroupPath,
    UserRecord,
};

use crate::config::{RestDirectoryConfig, RestDirectoryConfigError};
use crate::wire::{GroupRepresentation, TokenResponse, UserRepresentation};

/// Leeway subtracted from a token's lifetime so we never present a
/// token that expires mid-request.
const TOKEN_EXPIRY_LEEWAY_SECS: i64 = 30;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Directory backend speaking the admin REST API.
///
/// Authenticates with the OAuth2 client credentials grant and caches the
/// access token until shortly before expiry.
pub struct RestDirectory {
    config: RestDirectoryConfig,
    client: Client,
    token: RwLock<Option<CachedToken>>,
}

impl std::fmt::Debug for RestDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestDirectory")
            .field("base_url", &self.config.base_url)
            .field("realm", &self.config.realm)
            .finish_non_exhaustive()
    }
}

impl RestDirectory {
    /// Create a client for a validated configuration.
    pub fn new(config: RestDirectoryConfig) -> Result<Self, RestDirectoryConfigError> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RestDirectoryConfigError::Client {
                message: e.to_string(),
            })?;
        Ok(Self {
            config,
            client,
            token: RwLock::new(None),
        })
    }

    /// A bearer token for the admin API, fetched or cached.
    async fn bearer_token(&self) -> DirectoryResult<String> {
        let now = Utc::now();
        {
            let guard = self.token.read().await;
            if let Some(cached) = guard.as_ref().filter(|t| t.is_fresh(now)) {
                return Ok(cached.access_token.clone());
            }
        }

        debug!(realm = self.config.token_realm(), "requesting access token");
        let response = self
            .client
            .post(self.config.token_url())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
            ])
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(DirectoryError::Unauthorized);
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::invalid_response(format!("token response: {e}")))?;

        let lifetime = Duration::seconds(token.expires_in as i64 - TOKEN_EXPIRY_LEEWAY_SECS);
        let cached = CachedToken {
            access_token: token.access_token.clone(),
            expires_at: now + lifetime.max(Duration::zero()),
        };
        *self.token.write().await = Some(cached);
        Ok(token.access_token)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> DirectoryResult<Response> {
        let token = self.bearer_token().await?;
        builder
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_transport_error)
    }

    /// Map a non-success status to an error; `not_found` supplies the
    /// entity a 404 refers to.
    fn check_status(
        response: Response,
        not_found: Option<(&'static str, &str)>,
    ) -> DirectoryResult<Response> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DirectoryError::Unauthorized),
            StatusCode::NOT_FOUND => match not_found {
                Some((kind, identifier)) => Err(DirectoryError::not_found(kind, identifier)),
                None => Err(DirectoryError::request("unexpected 404")),
            },
            status => Err(DirectoryError::request(format!(
                "unexpected status {status} from {}",
                response.url()
            ))),
        }
    }

    /// Fetch the full server representation of a group, including its id.
    async fn group_representation(&self, path: &GroupPath) -> DirectoryResult<GroupRepresentation> {
        let url = self
            .config
            .admin_url(&format!("group-by-path{}", path.as_str()));
        let response = self.send(self.client.get(url)).await?;
        let response = Self::check_status(response, Some(("group", path.as_str())))?;
        response
            .json()
            .await
            .map_err(|e| DirectoryError::invalid_response(format!("group representation: {e}")))
    }

    /// Fetch the full server representation of a user, including their id.
    async fn user_representation(&self, username: &str) -> DirectoryResult<UserRepresentation> {
        let url = self.config.admin_url("users");
        let response = self
            .send(
                self.client
                    .get(url)
                    .query(&[("username", username), ("exact", "true")]),
            )
            .await?;
        let response = Self::check_status(response, None)?;
        let matches: Vec<UserRepresentation> = response
            .json()
            .await
            .map_err(|e| DirectoryError::invalid_response(format!("user search: {e}")))?;
        matches
            .into_iter()
            .find(|u| u.username == username)
            .ok_or_else(|| DirectoryError::not_found("user", username))
    }

    /// Update a user's membership in a group: `PUT` joins, `DELETE`
    /// leaves.
    async fn update_membership(
        &self,
        path: &GroupPath,
        username: &str,
        join: bool,
    ) -> DirectoryResult<()> {
        let group = self.group_representation(path).await?;
        let user = self.user_representation(username).await?;
        let url = self
            .config
            .admin_url(&format!("users/{}/groups/{}", user.id, group.id));
        let builder = if join {
            self.client.put(url)
        } else {
            self.client.delete(url)
        };
        let response = self.send(builder).await?;
        Self::check_status(response, Some(("group", path.as_str())))?;
        Ok(())
    }
}

fn map_transport_error(error: reqwest::Error) -> DirectoryError {
    if error.is_timeout() {
        DirectoryError::Timeout
    } else {
        DirectoryError::request_with_source("request failed", error)
    }
}

fn into_node(rep: GroupRepresentation) -> DirectoryResult<GroupNode> {
    rep.into_node()
        .map_err(|e| DirectoryError::invalid_response(e.to_string()))
}

#[async_trait]
impl DirectoryReader for RestDirectory {
    async fn group_hierarchy(&self) -> DirectoryResult<Vec<GroupNode>> {
        let url = self.config.admin_url("groups");
        let page_size = self.config.page_size;
        let mut roots = Vec::new();
        let mut first = 0u32;
        loop {
            let response = self
                .send(self.client.get(&url).query(&[
                    ("briefRepresentation", "false".to_string()),
                    ("first", first.to_string()),
                    ("max", page_size.to_string()),
                ]))
                .await?;
            let response = Self::check_status(response, None)?;
            let page: Vec<GroupRepresentation> = response
                .json()
                .await
                .map_err(|e| DirectoryError::invalid_response(format!("group listing: {e}")))?;
            let len = page.len() as u32;
            for rep in page {
                roots.push(into_node(rep)?);
            }
            if len < page_size {
                break;
            }
            first += page_size;
        }
        debug!(roots = roots.len(), "fetched group hierarchy");
        Ok(roots)
    }

    async fn group_by_path(&self, path: &GroupPath) -> DirectoryResult<GroupNode> {
        into_node(self.group_representation(path).await?)
    }

    async fn group_members(&self, path: &GroupPath) -> DirectoryResult<Vec<String>> {
        let group = self.group_representation(path).await?;
        let url = self.config.admin_url(&format!("groups/{}/members", group.id));
        let page_size = self.config.page_size;
        let mut members = Vec::new();
        let mut first = 0u32;
        loop {
            let response = self
                .send(self.client.get(&url).query(&[
                    ("briefRepresentation", "true".to_string()),
                    ("first", first.to_string()),
                    ("max", page_size.to_string()),
                ]))
                .await?;
            let response = Self::check_status(response, Some(("group", path.as_str())))?;
            let page: Vec<UserRepresentation> = response
                .json()
                .await
                .map_err(|e| DirectoryError::invalid_response(format!("member listing: {e}")))?;
            let len = page.len() as u32;
            members.extend(page.into_iter().map(|u| u.username));
            if len < page_size {
                break;
            }
            first += page_size;
        }
        Ok(members)
    }

    async fn user(&self, username: &str) -> DirectoryResult<UserRecord> {
        Ok(self.user_representation(username).await?.into_record())
    }
}

#[async_trait]
impl DirectoryWriter for RestDirectory {
    async fn add_member(&self, path: &GroupPath, username: &str) -> DirectoryResult<()> {
        debug!(group = %path, user = username, "adding member");
        self.update_membership(path, username, true).await
    }

    async fn remove_member(&self, path: &GroupPath, username: &str) -> DirectoryResult<()> {
        debug!(group = %path, user = username, "removing member");
        self.update_membership(path, username, false).await
    }

    async fn set_group_attribute(
        &self,
        path: &GroupPath,
        name: &str,
        value: Option<String>,
    ) -> DirectoryResult<()> {
        // Attribute updates are whole-group updates: read the current
        // representation, adjust one attribute, write the group back.
        let mut group = self.group_representation(path).await?;
        match value {
            Some(value) => {
                group.attributes.insert(name.to_string(), vec![value]);
            }
            None => {
                group.attributes.remove(name);
            }
        }
        let url = self.config.admin_url(&format!("groups/{}", group.id));
        debug!(group = %path, attribute = name, "updating group attribute");
        let response = self.send(self.client.put(url).json(&group)).await?;
        Self::check_status(response, Some(("group", path.as_str())))?;
        Ok(())
    }
}
