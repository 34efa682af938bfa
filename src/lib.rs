//! ghmirror - a local mirror of GitHub projects
//!
//! Keeps a SQLite copy of the commit history and latest file tree of the
//! repositories an account owns, fetched from the GitHub v2 API.
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`http`]: Rate-limited HTTP client over a pluggable transport
//! - [`github`]: GitHub v2 API client and response records
//! - [`store`]: Projects, commits and blobs in SQLite
//! - [`sync`]: Commit and tree synchronization
//! - [`hook`]: Push hook handling

pub mod config;
pub mod github;
pub mod hook;
pub mod http;
pub mod store;
pub mod sync;

pub use config::Config;
pub use github::{ApiError, FailSoft, GithubClient};
pub use hook::{handle_push, HookReply};
pub use http::{HttpError, HttpRequest, HttpResponse, HttpTransport, RateLimitedHttpClient};
pub use store::{MirrorDb, Project, Store};
pub use sync::{SyncEngine, SyncError, SyncOptions};
