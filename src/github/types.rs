//! Typed views over GitHub v2 JSON payloads.
//!
//! Each record carries a fixed set of fields. Unknown fields are dropped and
//! missing (or null) fields decode to `None`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};

/// Format of a GitHub timestamp once its timezone suffix is removed
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Length of the `-08:00` style suffix on v2 timestamps
const TIMEZONE_SUFFIX_LEN: usize = 6;

/// Parse a GitHub timestamp such as `2010-01-01T12:00:00-08:00`.
///
/// The timezone suffix is discarded, not converted: the result is the wall-clock
/// time as written, so it is only good for ordering within one sync run.
pub fn parse_github_timestamp(value: &str) -> chrono::ParseResult<NaiveDateTime> {
    let naive = value
        .len()
        .checked_sub(TIMEZONE_SUFFIX_LEN)
        .and_then(|end| value.get(..end))
        .unwrap_or("");
    NaiveDateTime::parse_from_str(naive, TIMESTAMP_FORMAT)
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|value| parse_github_timestamp(&value).map_err(serde::de::Error::custom))
        .transpose()
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct User {
    pub id: Option<u64>,
    pub login: Option<String>,
    pub name: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub blog: Option<String>,
    pub following_count: Option<u64>,
    pub followers_count: Option<u64>,
    pub public_gist_count: Option<u64>,
    pub public_repo_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Repo {
    pub watchers: Option<u64>,
    pub owner: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub private: Option<bool>,
    pub url: Option<String>,
    pub open_issues: Option<u64>,
    pub fork: Option<bool>,
    pub homepage: Option<String>,
    pub forks: Option<u64>,
}

/// Author or committer attached to a commit
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Person {
    pub name: Option<String>,
    pub login: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ParentRef {
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Commit {
    pub message: Option<String>,
    pub parents: Option<Vec<ParentRef>>,
    pub url: Option<String>,
    pub author: Option<Person>,
    /// Commit SHA
    pub id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub committed_date: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub authored_date: Option<NaiveDateTime>,
    /// Root tree SHA
    pub tree: Option<String>,
    pub committer: Option<Person>,
}

impl Commit {
    /// Committer display name, empty when GitHub did not send one
    pub fn committer_name(&self) -> &str {
        self.committer
            .as_ref()
            .and_then(|c| c.name.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blob,
    Tree,
    #[serde(other)]
    Other,
}

/// One entry of a tree listing
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TreeEntry {
    pub name: Option<String>,
    pub sha: Option<String>,
    pub mode: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<EntryKind>,
}

impl TreeEntry {
    pub fn is_tree(&self) -> bool {
        self.kind == Some(EntryKind::Tree)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Blob {
    pub name: Option<String>,
    pub size: Option<u64>,
    pub sha: Option<String>,
    pub mode: Option<String>,
    pub mime_type: Option<String>,
    pub data: Option<String>,
}

// Response envelopes: each v2 payload nests its record under a resource key.

#[derive(Debug, Deserialize)]
pub(crate) struct UserEnvelope {
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UsersEnvelope {
    pub users: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RepoEnvelope {
    pub repository: Repo,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReposEnvelope {
    pub repositories: Vec<Repo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommitEnvelope {
    pub commit: Commit,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommitsEnvelope {
    pub commits: Vec<Commit>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TreeEnvelope {
    pub tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BlobEnvelope {
    pub blob: Blob,
}
