//! GitHub v2 API client
//!
//! Builds v2-style REST URLs, injects the configured login and token as query
//! credentials, and decodes responses into the records in [`types`]. Every
//! operation returns an [`ApiResult`]; callers that want the fail-soft
//! behaviour ("no result" instead of an error) opt in with [`FailSoft`].

pub mod types;

use anyhow::{Context, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::http::{HttpError, HttpRequest, RateLimitedHttpClient, ReqwestTransport};

pub use types::{Blob, Commit, EntryKind, Person, Repo, TreeEntry, User};
use types::{
    BlobEnvelope, CommitEnvelope, CommitsEnvelope, RepoEnvelope, ReposEnvelope, TreeEnvelope,
    UserEnvelope, UsersEnvelope,
};

pub const DEFAULT_API_BASE: &str = "http://github.com/api/v2/json";
pub const DEFAULT_GIST_BASE: &str = "http://gist.github.com";

const GIST_LOCATION_PATTERN: &str = r"^https?://gist\.github\.com/(\d+)/?";

/// Why a GitHub call produced no result
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("GitHub returned status {0}")]
    Status(u16),

    #[error("error in data from GitHub API: {0}")]
    Decode(String),

    #[error("gist creation response carried no Location header")]
    MissingLocation,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Collapse an API error into "no result", logging it as a warning.
///
/// A transient failure is indistinguishable from "nothing new" after this,
/// which is what a scheduled batch sync wants.
pub trait FailSoft<T> {
    fn fail_soft(self, what: &str) -> Option<T>;
}

impl<T> FailSoft<T> for ApiResult<T> {
    fn fail_soft(self, what: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("GitHub {} returned no result: {}", what, e);
                None
            }
        }
    }
}

/// Client for one GitHub account acting as the source of truth
pub struct GithubClient {
    http: RateLimitedHttpClient,
    login: String,
    token: Option<String>,
    api_base: String,
    gist_base: String,
}

impl GithubClient {
    pub fn new(http: RateLimitedHttpClient, login: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            login: login.into(),
            token,
            api_base: DEFAULT_API_BASE.to_string(),
            gist_base: DEFAULT_GIST_BASE.to_string(),
        }
    }

    /// Build a reqwest-backed client from configuration.
    ///
    /// The token comes from the config file, falling back to `GITHUB_TOKEN`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = ReqwestTransport::new().context("Failed to create HTTP client")?;
        let http = RateLimitedHttpClient::new(Arc::new(transport), config.http.user_agent.clone())
            .with_min_interval(Duration::from_millis(config.http.min_interval_ms))
            .with_timeout(Duration::from_secs(config.http.timeout_secs));

        let token = config.github.token.clone().or_else(Self::environment_token);
        if token.is_none() {
            debug!("No GitHub token configured, calls will be unauthenticated");
        }

        Ok(Self::new(http, config.github.login.clone(), token)
            .with_api_base(config.github.api_base.clone())
            .with_gist_base(config.github.gist_base.clone()))
    }

    fn environment_token() -> Option<String> {
        env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty())
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_gist_base(mut self, gist_base: impl Into<String>) -> Self {
        self.gist_base = gist_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Account whose repositories are mirrored
    pub fn login(&self) -> &str {
        &self.login
    }

    fn credentials(&self) -> [(&'static str, String); 2] {
        [
            ("username", self.login.clone()),
            ("token", self.token.clone().unwrap_or_default()),
        ]
    }

    /// GET `<api_base>/<resource>` with credentials and decode the JSON body
    async fn api_call<T: DeserializeOwned>(&self, resource: String) -> ApiResult<T> {
        let url = format!("{}/{}", self.api_base, resource);
        let request = HttpRequest::get(url).params(self.credentials());

        let response = self.http.send(request).await?;
        if response.status != 200 {
            return Err(ApiError::Status(response.status));
        }

        serde_json::from_slice(&response.body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn get_user(&self, login: &str) -> ApiResult<User> {
        self.api_call::<UserEnvelope>(format!("user/show/{}", login))
            .await
            .map(|e| e.user)
    }

    /// Fetch the configured account, which also checks the credentials
    pub async fn authenticate(&self) -> ApiResult<User> {
        self.get_user(&self.login).await
    }

    pub async fn followers(&self, login: &str) -> ApiResult<Vec<String>> {
        self.api_call::<UsersEnvelope>(format!("user/show/{}/followers", login))
            .await
            .map(|e| e.users)
    }

    pub async fn following(&self, login: &str) -> ApiResult<Vec<String>> {
        self.api_call::<UsersEnvelope>(format!("user/show/{}/following", login))
            .await
            .map(|e| e.users)
    }

    pub async fn watching(&self, login: &str) -> ApiResult<Vec<Repo>> {
        self.api_call::<ReposEnvelope>(format!("repos/watched/{}/", login))
            .await
            .map(|e| e.repositories)
    }

    pub async fn get_repo(&self, owner: &str, repo: &str) -> ApiResult<Repo> {
        self.api_call::<RepoEnvelope>(format!("repos/show/{}/{}", owner, repo))
            .await
            .map(|e| e.repository)
    }

    pub async fn get_repos(&self, owner: &str) -> ApiResult<Vec<Repo>> {
        self.api_call::<ReposEnvelope>(format!("repos/show/{}/", owner))
            .await
            .map(|e| e.repositories)
    }

    /// Commit summaries on `branch`, newest first, in the order GitHub sent them
    pub async fn get_commits(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        file_path: Option<&str>,
    ) -> ApiResult<Vec<Commit>> {
        let mut resource = format!("commits/list/{}/{}/{}", owner, repo, branch);
        if let Some(file_path) = file_path.filter(|p| !p.is_empty()) {
            resource = format!("{}/{}", resource, file_path);
        }

        self.api_call::<CommitsEnvelope>(resource)
            .await
            .map(|e| e.commits)
    }

    pub async fn get_commit(&self, owner: &str, repo: &str, sha: &str) -> ApiResult<Commit> {
        self.api_call::<CommitEnvelope>(format!("commits/show/{}/{}/{}", owner, repo, sha))
            .await
            .map(|e| e.commit)
    }

    pub async fn get_tree(&self, owner: &str, repo: &str, sha: &str) -> ApiResult<Vec<TreeEntry>> {
        self.api_call::<TreeEnvelope>(format!("tree/show/{}/{}/{}", owner, repo, sha))
            .await
            .map(|e| e.tree)
    }

    /// Blob `file_path` resolved relative to tree `sha`
    pub async fn get_blob(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        file_path: &str,
    ) -> ApiResult<Blob> {
        self.api_call::<BlobEnvelope>(format!(
            "blob/show/{}/{}/{}/{}",
            owner, repo, sha, file_path
        ))
        .await
        .map(|e| e.blob)
    }

    /// Create an anonymous gist and return its numeric id.
    ///
    /// Gist creation only works without credentials, so none are sent. GitHub
    /// answers with a 302 whose Location carries the new id.
    pub async fn create_gist(&self, name: &str, data: &str, ext: &str) -> ApiResult<String> {
        let request = HttpRequest::post(format!("{}/gists", self.gist_base))
            .param("file_name[gistfile1]", name)
            .param("file_contents[gistfile1]", data)
            .param("file_ext[gistfile1]", ext)
            .without_redirects();

        let response = self.http.send(request).await?;
        if response.status != 302 {
            return Err(ApiError::Status(response.status));
        }

        let location = response.header("location").ok_or(ApiError::MissingLocation)?;
        parse_gist_location(location)
    }

    /// Raw text of a gist
    pub async fn get_gist(&self, gist_id: &str) -> ApiResult<String> {
        let request = HttpRequest::get(format!("{}/{}.txt", self.gist_base, gist_id));

        let response = self.http.send(request).await?;
        if response.status != 200 {
            return Err(ApiError::Status(response.status));
        }

        Ok(response.text())
    }
}

/// Extract the gist id from a `http://gist.github.com/<id>` location
pub fn parse_gist_location(location: &str) -> ApiResult<String> {
    let pattern = Regex::new(GIST_LOCATION_PATTERN).map_err(|e| ApiError::Decode(e.to_string()))?;

    pattern
        .captures(location)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ApiError::Decode(format!("unexpected gist location: {}", location)))
}
