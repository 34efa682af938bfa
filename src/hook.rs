//! GitHub push hook handling
//!
//! A push notification names a repository; the matching project is synced.
//! Anything that goes wrong after the key check is logged and answered with
//! an empty 200 so GitHub never retries or disables the hook.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::store::MirrorDb;
use crate::sync::SyncEngine;

/// Reply to a push hook request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookReply {
    /// Wrong secret key
    NotFound,
    /// The project was synced
    Synced,
    /// Nothing was synced
    Ignored,
}

impl HookReply {
    pub fn status(self) -> u16 {
        match self {
            HookReply::NotFound => 404,
            HookReply::Synced | HookReply::Ignored => 200,
        }
    }

    pub fn body(self) -> &'static str {
        match self {
            HookReply::Synced => "OK",
            HookReply::NotFound | HookReply::Ignored => "",
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    repository: PushRepository,
}

#[derive(Debug, Deserialize)]
struct PushRepository {
    name: String,
}

/// Repository name carried by a push payload
pub fn repository_name(body: &str) -> Result<String> {
    let payload: PushPayload =
        serde_json::from_str(body).context("Failed to parse push payload")?;
    Ok(payload.repository.name)
}

/// Handle one push notification
pub async fn handle_push(
    engine: &SyncEngine<'_>,
    db: &MirrorDb,
    secret: &str,
    provided_key: &str,
    body: &str,
) -> HookReply {
    if provided_key != secret {
        warn!("Push hook called with a wrong key");
        return HookReply::NotFound;
    }

    match sync_pushed_project(engine, db, body).await {
        Ok(()) => HookReply::Synced,
        Err(e) => {
            warn!("Push hook ignored: {:#}", e);
            HookReply::Ignored
        }
    }
}

async fn sync_pushed_project(engine: &SyncEngine<'_>, db: &MirrorDb, body: &str) -> Result<()> {
    let repo = repository_name(body)?;

    let mut projects = db.projects_for_repo(&repo)?;
    if projects.len() != 1 {
        bail!("{} projects track repository {}", projects.len(), repo);
    }
    let project = projects.remove(0);

    let processed = engine.sync_project(&project).await?;
    info!(
        "Push hook for {}: {} new commits processed",
        repo,
        processed.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::GithubClient;
    use crate::http::stub::StubTransport;
    use crate::http::RateLimitedHttpClient;
    use crate::sync::SyncOptions;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn client_with(stub: &StubTransport) -> GithubClient {
        let http = RateLimitedHttpClient::new(Arc::new(stub.clone()), "ghmirror-test")
            .with_min_interval(Duration::ZERO);
        GithubClient::new(http, "coleifer", None)
    }

    fn push_body(repo: &str) -> String {
        json!({"ref": "refs/heads/master", "repository": {"name": repo, "owner": {"name": "coleifer"}}})
            .to_string()
    }

    #[tokio::test]
    async fn test_wrong_key_is_not_found() {
        let stub = StubTransport::new();
        let client = client_with(&stub);
        let db = MirrorDb::open_in_memory().unwrap();
        let engine = SyncEngine::new(&client, &db, SyncOptions::default());

        let reply = handle_push(&engine, &db, "1337", "1234", &push_body("repo")).await;
        assert_eq!(reply, HookReply::NotFound);
        assert_eq!(reply.status(), 404);
        assert!(stub.requests().is_empty());
    }

    #[tokio::test]
    async fn test_push_syncs_matching_project() {
        let stub = StubTransport::new();
        stub.push_json(
            "http://github.com/api/v2/json/commits/list/coleifer/repo/master",
            json!({"commits": [{"id": "c1", "committed_date": "2010-01-01T00:00:00-08:00"}]}),
        );
        let client = client_with(&stub);
        let db = MirrorDb::open_in_memory().unwrap();
        let project = db.create_project("Repo", "", "repo").unwrap();
        let engine = SyncEngine::new(&client, &db, SyncOptions::default());

        let reply = handle_push(&engine, &db, "1337", "1337", &push_body("repo")).await;
        assert_eq!(reply, HookReply::Synced);
        assert_eq!(reply.body(), "OK");
        assert_eq!(db.list_commits(project.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let stub = StubTransport::new();
        let client = client_with(&stub);
        let db = MirrorDb::open_in_memory().unwrap();
        db.create_project("Unlinked", "", "").unwrap();
        let engine = SyncEngine::new(&client, &db, SyncOptions::default());

        let unknown = push_body("unknown");
        for body in ["not json", "{}", unknown.as_str()] {
            let reply = handle_push(&engine, &db, "1337", "1337", body).await;
            assert_eq!(reply, HookReply::Ignored);
            assert_eq!(reply.status(), 200);
            assert_eq!(reply.body(), "");
        }
        assert!(stub.requests().is_empty());
    }

    #[tokio::test]
    async fn test_ambiguous_repository_is_ignored() {
        let stub = StubTransport::new();
        let client = client_with(&stub);
        let db = MirrorDb::open_in_memory().unwrap();
        db.create_project("One", "", "repo").unwrap();
        db.create_project("Two", "", "repo").unwrap();
        let engine = SyncEngine::new(&client, &db, SyncOptions::default());

        let reply = handle_push(&engine, &db, "1337", "1337", &push_body("repo")).await;
        assert_eq!(reply, HookReply::Ignored);
        assert!(stub.requests().is_empty());
    }

    #[test]
    fn test_repository_name() {
        assert_eq!(repository_name(&push_body("peewee")).unwrap(), "peewee");
        assert!(repository_name(r#"{"repository": {}}"#).is_err());
    }
}
