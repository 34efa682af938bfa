//! Common test utilities and helpers for ghmirror tests
#![allow(dead_code)]

use async_trait::async_trait;
use ghmirror::{GithubClient, HttpError, HttpRequest, HttpResponse, HttpTransport, RateLimitedHttpClient};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const API: &str = "http://github.com/api/v2/json";
pub const LOGIN: &str = "coleifer";

/// In-memory transport answering from a URL -> response table.
///
/// The query string is not part of the key. Every request is recorded.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    routes: Arc<Mutex<HashMap<String, HttpResponse>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: impl Into<String>, response: HttpResponse) {
        self.routes.lock().unwrap().insert(url.into(), response);
    }

    pub fn respond_json(&self, url: impl Into<String>, body: Value) {
        self.respond(
            url,
            HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: body.to_string().into_bytes(),
            },
        );
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Client for [`LOGIN`] over this transport with no rate limit delay
    pub fn client(&self) -> GithubClient {
        let http = RateLimitedHttpClient::new(Arc::new(self.clone()), "ghmirror-tests")
            .with_min_interval(Duration::ZERO);
        GithubClient::new(http, LOGIN, Some("token".to_string()))
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);

        self.routes
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .ok_or_else(|| HttpError::Transport(format!("connection refused: {}", url)))
    }
}

/// A small repository on GitHub: commits newest first and the trees and
/// blobs reachable from the first commit.
pub struct RemoteRepo {
    pub name: String,
    pub commits: Vec<Value>,
    pub trees: Vec<(String, Value)>,
    pub blobs: Vec<(String, String, Value)>,
}

impl RemoteRepo {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            commits: Vec::new(),
            trees: Vec::new(),
            blobs: Vec::new(),
        }
    }

    pub fn commit(mut self, sha: &str, tree: &str, date: &str, message: &str) -> Self {
        self.commits.push(json!({
            "id": sha,
            "tree": tree,
            "message": message,
            "url": format!("http://github.com/{}/{}/commit/{}", LOGIN, self.name, sha),
            "committed_date": date,
            "authored_date": date,
            "committer": {"name": "Charles Leifer", "login": LOGIN},
            "author": {"name": "Charles Leifer", "login": LOGIN},
            "parents": []
        }));
        self
    }

    /// `entries` are (name, sha, type) triples
    pub fn tree(mut self, sha: &str, entries: &[(&str, &str, &str)]) -> Self {
        let entries: Vec<Value> = entries
            .iter()
            .map(|(name, sha, kind)| json!({"name": name, "sha": sha, "type": kind, "mode": "100644"}))
            .collect();
        self.trees.push((sha.to_string(), Value::Array(entries)));
        self
    }

    pub fn blob(mut self, tree_sha: &str, name: &str, data: &str) -> Self {
        self.blobs.push((
            tree_sha.to_string(),
            name.to_string(),
            json!({
                "name": name,
                "size": data.len(),
                "sha": format!("{}-{}", tree_sha, name),
                "mode": "100644",
                "mime_type": "text/plain",
                "data": data
            }),
        ));
        self
    }

    pub fn serve(&self, transport: &ScriptedTransport) {
        transport.respond_json(
            format!("{}/commits/list/{}/{}/master", API, LOGIN, self.name),
            json!({ "commits": self.commits }),
        );
        for (sha, entries) in &self.trees {
            transport.respond_json(
                format!("{}/tree/show/{}/{}/{}", API, LOGIN, self.name, sha),
                json!({ "tree": entries }),
            );
        }
        for (tree_sha, name, blob) in &self.blobs {
            transport.respond_json(
                format!("{}/blob/show/{}/{}/{}/{}", API, LOGIN, self.name, tree_sha, name),
                json!({ "blob": blob }),
            );
        }
    }
}

/// Temporary config, database and log locations for running the binary
pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Write a config pointing every path into the temp dir
    pub fn create_config(&self) -> PathBuf {
        let root = self.temp_dir.path();
        let config = format!(
            r#"
github:
  login: "{login}"
  api_base: "http://127.0.0.1:9/api/v2/json"
database:
  path: "{db}"
logging:
  level: "info"
  file: "{log}"
"#,
            login = LOGIN,
            db = root.join("mirror.db").display(),
            log = root.join("logs").join("github_log.log").display(),
        );

        let config_path = root.join("config.yml");
        std::fs::write(&config_path, config).expect("Failed to write test config");
        config_path
    }
}

/// Assertion helper for command output
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
