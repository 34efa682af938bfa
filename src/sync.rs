//! Sync Engine - mirrors commits and the latest tree of a project
//!
//! A sync pass runs in two phases:
//! 1. Commit sync: list commits on the configured branch and create a row for
//!    every SHA not seen before. Known SHAs are skipped untouched.
//! 2. Tree sync: walk the tree of the newest newly-created commit, creating a
//!    blob row per entry and fetching its content.
//!
//! "No result" from the API at any step ends that branch of work quietly.
//! Only a missing repository identifier is reported as an error.

use futures::future::{FutureExt, LocalBoxFuture};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::github::{self, FailSoft, GithubClient};
use crate::store::{Blob, Commit, Project, Store};

#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing repository identifier on a project, commit or blob
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Engine behaviour switches
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Branch whose history is listed
    pub branch: String,
    /// Request blob content for directory entries too
    pub fetch_tree_content: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            branch: "master".to_string(),
            fetch_tree_content: true,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            branch: config.github.branch.clone(),
            fetch_tree_content: config.sync.fetch_tree_content,
        }
    }
}

/// Orchestrates project syncs against one GitHub account and one store
pub struct SyncEngine<'a> {
    client: &'a GithubClient,
    store: &'a dyn Store,
    options: SyncOptions,
}

fn require_repo(project: &Project) -> SyncResult<&str> {
    let repo = project.github_repo.trim();
    if repo.is_empty() {
        return Err(SyncError::Config(format!(
            "No GitHub repo associated with project \"{}\"",
            project.title
        )));
    }
    Ok(repo)
}

/// Copy the fields of a commit summary onto a fresh local row
fn populate_commit(commit: &mut Commit, remote: &github::Commit) {
    commit.created = remote.committed_date;
    commit.message = remote.message.clone().unwrap_or_default();
    commit.name = remote.committer_name().to_string();
    commit.tree = remote.tree.clone().unwrap_or_default();
    commit.url = remote.url.clone().unwrap_or_default();
}

/// Fill in fetched content. The path stays the one computed during the walk.
fn populate_blob(blob: &mut Blob, remote: github::Blob) {
    blob.size = remote.size.unwrap_or(0);
    blob.mime_type = remote.mime_type.unwrap_or_default();
    blob.data = remote.data.unwrap_or_default();
    blob.sha = remote.sha.unwrap_or_default();
}

impl<'a> SyncEngine<'a> {
    pub fn new(client: &'a GithubClient, store: &'a dyn Store, options: SyncOptions) -> Self {
        Self {
            client,
            store,
            options,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Mirror new commits of `project`, then the tree of the newest one.
    ///
    /// Returns the commits created by this pass, newest first. An API failure
    /// on the commit list yields an empty list.
    pub async fn sync_project(&self, project: &Project) -> SyncResult<Vec<Commit>> {
        let repo = require_repo(project)?;
        let owner = self.client.login();
        let start = Instant::now();

        let Some(remote_commits) = self
            .client
            .get_commits(owner, repo, &self.options.branch, None)
            .await
            .fail_soft("commit list")
        else {
            return Ok(Vec::new());
        };

        debug!(
            "{} commits listed for {}/{}",
            remote_commits.len(),
            owner,
            repo
        );

        // The listing already carries everything a commit row needs, so no
        // per-commit fetch is made.
        let mut processed = Vec::new();
        for remote in &remote_commits {
            let Some(sha) = remote.id.as_deref().filter(|s| !s.is_empty()) else {
                warn!("Skipping commit without an id in {}/{}", owner, repo);
                continue;
            };

            let (mut commit, created) = self.store.get_or_create_commit(project.id, sha)?;
            if !created {
                continue;
            }

            populate_commit(&mut commit, remote);
            self.store.save_commit(&commit)?;
            processed.push(commit);
        }

        if let Some(latest) = processed.first() {
            let blobs = self.walk_commit_tree(project, latest).await?;
            debug!("{} blobs created for commit {}", blobs, latest.sha);
        }

        debug!(
            "{}: {} new commits (took {:.2}s)",
            project.title,
            processed.len(),
            start.elapsed().as_secs_f64()
        );

        Ok(processed)
    }

    /// Walk the tree of `commit`, creating a blob row for every entry not
    /// already mirrored. Returns the number of rows created.
    pub async fn sync_tree(&self, commit: &Commit) -> SyncResult<usize> {
        let project = self.store.get_project(commit.project_id)?.ok_or_else(|| {
            SyncError::Config(format!("Commit {} has no owning project", commit.sha))
        })?;
        self.walk_commit_tree(&project, commit).await
    }

    async fn walk_commit_tree(&self, project: &Project, commit: &Commit) -> SyncResult<usize> {
        let repo = require_repo(project)?;
        if commit.tree.is_empty() {
            warn!("Commit {} has no tree SHA, nothing to walk", commit.sha);
            return Ok(0);
        }

        self.walk(repo, commit, commit.tree.clone(), String::new())
            .await
    }

    /// One level of the tree walk.
    ///
    /// Subtrees are walked before the entry's own content is requested. Blob
    /// content is addressed by the sha of the tree being walked plus the entry
    /// name.
    fn walk<'b>(
        &'b self,
        repo: &'b str,
        commit: &'b Commit,
        tree_sha: String,
        prefix: String,
    ) -> LocalBoxFuture<'b, SyncResult<usize>> {
        async move {
            let owner = self.client.login();

            let Some(entries) = self
                .client
                .get_tree(owner, repo, &tree_sha)
                .await
                .fail_soft("tree")
            else {
                return Ok(0);
            };

            let mut created_rows = 0;
            for entry in entries {
                let Some(name) = entry.name.as_deref().filter(|n| !n.is_empty()) else {
                    warn!("Skipping unnamed entry in tree {}", tree_sha);
                    continue;
                };

                let path = format!("{}{}", prefix, name);
                let (mut blob, created) = self.store.get_or_create_blob(commit.id, name, &path)?;
                if !created {
                    continue;
                }
                created_rows += 1;

                if entry.is_tree() {
                    match entry.sha.as_deref() {
                        Some(sub_sha) => {
                            created_rows += self
                                .walk(repo, commit, sub_sha.to_string(), format!("{}/", path))
                                .await?;
                        }
                        None => warn!("Directory {} has no tree SHA", path),
                    }

                    if !self.options.fetch_tree_content {
                        continue;
                    }
                }

                if let Some(remote) = self
                    .client
                    .get_blob(owner, repo, &tree_sha, name)
                    .await
                    .fail_soft("blob")
                {
                    populate_blob(&mut blob, remote);
                    self.store.save_blob(&blob)?;
                }
            }

            Ok(created_rows)
        }
        .boxed_local()
    }

    /// Re-fetch one commit and overwrite its local fields.
    ///
    /// Returns whether GitHub answered; on "no result" the row is left as is.
    pub async fn refresh_commit(&self, commit: &mut Commit) -> SyncResult<bool> {
        let project = self.store.get_project(commit.project_id)?.ok_or_else(|| {
            SyncError::Config(format!("Commit {} has no owning project", commit.sha))
        })?;
        let repo = require_repo(&project)?;

        let Some(remote) = self
            .client
            .get_commit(self.client.login(), repo, &commit.sha)
            .await
            .fail_soft("commit")
        else {
            return Ok(false);
        };

        populate_commit(commit, &remote);
        self.store.save_commit(commit)?;
        info!("Refreshed commit {} of {}", commit.sha, project.title);
        Ok(true)
    }
}
