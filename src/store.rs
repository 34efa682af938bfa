//! Mirror Store - SQLite persistence for projects, commits and blobs
//!
//! Rows are deduplicated by their natural identity:
//! - projects by slug
//! - commits by (project, sha)
//! - blobs by (commit, name, path)
//!
//! The sync engine only needs the get-or-create/save surface described by the
//! [`Store`] trait; the remaining queries serve the presentation side.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::Config;

/// Storage format for commit timestamps; sorts lexicographically
const COMMIT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A tracked repository
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: i64,
    pub title: String,
    /// URL-safe identifier, fixed at creation
    pub slug: String,
    pub description: String,
    /// Repository name under the mirrored account
    pub github_repo: String,
    pub created: DateTime<Utc>,
}

impl Project {
    /// Web URL of the repository, empty when login or repo is unset
    pub fn github_url(&self, login: &str) -> String {
        if login.is_empty() || self.github_repo.is_empty() {
            return String::new();
        }
        format!("http://github.com/{}/{}", login, self.github_repo)
    }

    pub fn clone_command(&self, login: &str) -> String {
        if login.is_empty() || self.github_repo.is_empty() {
            return String::new();
        }
        format!("git clone git://github.com/{}/{}.git", login, self.github_repo)
    }
}

/// A mirrored commit
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub id: i64,
    pub project_id: i64,
    pub sha: String,
    /// Root tree SHA
    pub tree: String,
    /// Commit timestamp, unset until fetched
    pub created: Option<NaiveDateTime>,
    /// Committer display name
    pub name: String,
    pub message: String,
    pub url: String,
}

/// A file (or directory marker) from a commit's tree.
///
/// A blob with empty data and zero size is a pending row whose content has not
/// been fetched yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub id: i64,
    pub commit_id: i64,
    pub name: String,
    pub path: String,
    pub size: u64,
    pub mime_type: String,
    pub data: String,
    pub sha: String,
}

impl Blob {
    pub fn is_pending(&self) -> bool {
        self.size == 0 && self.data.is_empty() && self.sha.is_empty()
    }
}

/// Persistence surface the sync engine depends on
pub trait Store {
    fn get_project(&self, id: i64) -> Result<Option<Project>>;

    /// Fetch the commit keyed by (project, sha) or insert an empty one.
    /// The flag is true when the row was created by this call.
    fn get_or_create_commit(&self, project_id: i64, sha: &str) -> Result<(Commit, bool)>;

    fn save_commit(&self, commit: &Commit) -> Result<()>;

    /// Fetch the blob keyed by (commit, name, path) or insert a pending one.
    /// The flag is true when the row was created by this call.
    fn get_or_create_blob(&self, commit_id: i64, name: &str, path: &str) -> Result<(Blob, bool)>;

    /// Store fetched content. The identity columns are never rewritten.
    fn save_blob(&self, blob: &Blob) -> Result<()>;
}

/// Turn a title into a URL-safe slug: lower-case ASCII letters, digits and
/// underscores, with runs of whitespace and hyphens collapsed to one hyphen.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_separator = false;

    for c in title.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(c);
        } else if c == '-' || c.is_whitespace() {
            pending_separator = true;
        }
    }

    slug
}

fn project_from_row(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        github_repo: row.get(4)?,
        created: row
            .get::<_, String>(5)
            .ok()
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
    })
}

fn commit_from_row(row: &Row) -> rusqlite::Result<Commit> {
    Ok(Commit {
        id: row.get(0)?,
        project_id: row.get(1)?,
        sha: row.get(2)?,
        tree: row.get(3)?,
        created: row
            .get::<_, Option<String>>(4)?
            .and_then(|s| NaiveDateTime::parse_from_str(&s, COMMIT_TIME_FORMAT).ok()),
        name: row.get(5)?,
        message: row.get(6)?,
        url: row.get(7)?,
    })
}

fn blob_from_row(row: &Row) -> rusqlite::Result<Blob> {
    Ok(Blob {
        id: row.get(0)?,
        commit_id: row.get(1)?,
        name: row.get(2)?,
        path: row.get(3)?,
        size: row.get::<_, i64>(4)?.max(0) as u64,
        mime_type: row.get(5)?,
        data: row.get(6)?,
        sha: row.get(7)?,
    })
}

const PROJECT_COLUMNS: &str = "id, title, slug, description, github_repo, created";
const COMMIT_COLUMNS: &str = "id, project_id, sha, tree, created, name, message, url";
const BLOB_COLUMNS: &str = "id, commit_id, name, path, size, mime_type, data, sha";

/// SQLite-backed mirror database
pub struct MirrorDb {
    conn: Connection,
}

impl MirrorDb {
    /// Open the database configured under `database.path`
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_at(PathBuf::from(&config.database.path))
    }

    /// Open or create the mirror database at a specific path
    pub fn open_at(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let db = Self { conn };
        db.initialize()?;

        info!("Mirror database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                PRAGMA foreign_keys = ON;

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    slug TEXT UNIQUE NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    github_repo TEXT NOT NULL DEFAULT '',
                    created TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS commits (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    sha TEXT NOT NULL,
                    tree TEXT NOT NULL DEFAULT '',
                    created TEXT,
                    name TEXT NOT NULL DEFAULT '',
                    message TEXT NOT NULL DEFAULT '',
                    url TEXT NOT NULL DEFAULT '',
                    UNIQUE (project_id, sha)
                );

                CREATE TABLE IF NOT EXISTS blobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    commit_id INTEGER NOT NULL REFERENCES commits(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    path TEXT NOT NULL,
                    size INTEGER NOT NULL DEFAULT 0,
                    mime_type TEXT NOT NULL DEFAULT '',
                    data TEXT NOT NULL DEFAULT '',
                    sha TEXT NOT NULL DEFAULT '',
                    UNIQUE (commit_id, name, path)
                );

                CREATE INDEX IF NOT EXISTS idx_projects_repo ON projects(github_repo);
                CREATE INDEX IF NOT EXISTS idx_commits_created ON commits(project_id, created);
                CREATE INDEX IF NOT EXISTS idx_blobs_path ON blobs(commit_id, path);
                "#,
            )
            .context("Failed to initialize database schema")?;

        debug!("Database schema initialized");
        Ok(())
    }

    // =========================================================================
    // Projects
    // =========================================================================

    /// Create a project. The slug is derived from the title once, with a
    /// numeric suffix when another project already holds it.
    pub fn create_project(&self, title: &str, description: &str, github_repo: &str) -> Result<Project> {
        let base = match slugify(title) {
            s if s.is_empty() => "project".to_string(),
            s => s,
        };

        let mut slug = base.clone();
        let mut n = 2;
        while self.get_project_by_slug(&slug)?.is_some() {
            slug = format!("{}-{}", base, n);
            n += 1;
        }

        let created = Utc::now();
        self.conn
            .execute(
                "INSERT INTO projects (title, slug, description, github_repo, created) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![title, slug, description, github_repo.trim(), created.to_rfc3339()],
            )
            .context("Failed to create project")?;

        let id = self.conn.last_insert_rowid();
        info!("Created project {} ({})", title, slug);

        self.get_project(id)?
            .with_context(|| format!("Project {} vanished after insert", id))
    }

    /// All projects ordered by title
    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM projects ORDER BY title, id",
            PROJECT_COLUMNS
        ))?;

        let projects = stmt
            .query_map([], project_from_row)
            .context("Failed to query projects")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect projects")?;

        Ok(projects)
    }

    pub fn get_project_by_slug(&self, slug: &str) -> Result<Option<Project>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM projects WHERE slug = ?1", PROJECT_COLUMNS),
                params![slug],
                project_from_row,
            )
            .optional()
            .context("Failed to query project by slug")
    }

    /// Projects tracking the given repository name
    pub fn projects_for_repo(&self, github_repo: &str) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM projects WHERE github_repo = ?1 ORDER BY title, id",
            PROJECT_COLUMNS
        ))?;

        let projects = stmt
            .query_map(params![github_repo.trim()], project_from_row)
            .context("Failed to query projects by repository")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect projects")?;

        Ok(projects)
    }

    // =========================================================================
    // Commits
    // =========================================================================

    /// Commits of a project, newest first (unfetched timestamps last)
    pub fn list_commits(&self, project_id: i64) -> Result<Vec<Commit>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM commits WHERE project_id = ?1 ORDER BY created IS NULL, created DESC, id DESC",
            COMMIT_COLUMNS
        ))?;

        let commits = stmt
            .query_map(params![project_id], commit_from_row)
            .context("Failed to query commits")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect commits")?;

        Ok(commits)
    }

    pub fn latest_commit(&self, project_id: i64) -> Result<Option<Commit>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM commits WHERE project_id = ?1 ORDER BY created IS NULL, created DESC, id DESC LIMIT 1",
                    COMMIT_COLUMNS
                ),
                params![project_id],
                commit_from_row,
            )
            .optional()
            .context("Failed to query latest commit")
    }

    pub fn find_commit(&self, project_id: i64, sha: &str) -> Result<Option<Commit>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM commits WHERE project_id = ?1 AND sha = ?2",
                    COMMIT_COLUMNS
                ),
                params![project_id, sha],
                commit_from_row,
            )
            .optional()
            .context("Failed to query commit")
    }

    // =========================================================================
    // Blobs
    // =========================================================================

    /// Files of a commit ordered by path
    pub fn list_blobs(&self, commit_id: i64) -> Result<Vec<Blob>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM blobs WHERE commit_id = ?1 ORDER BY path, id",
            BLOB_COLUMNS
        ))?;

        let blobs = stmt
            .query_map(params![commit_id], blob_from_row)
            .context("Failed to query blobs")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect blobs")?;

        Ok(blobs)
    }

    pub fn get_blob_by_path(&self, commit_id: i64, path: &str) -> Result<Option<Blob>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM blobs WHERE commit_id = ?1 AND path = ?2 ORDER BY id LIMIT 1",
                    BLOB_COLUMNS
                ),
                params![commit_id, path],
                blob_from_row,
            )
            .optional()
            .context("Failed to query blob by path")
    }

    fn find_blob(&self, commit_id: i64, name: &str, path: &str) -> Result<Option<Blob>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM blobs WHERE commit_id = ?1 AND name = ?2 AND path = ?3",
                    BLOB_COLUMNS
                ),
                params![commit_id, name, path],
                blob_from_row,
            )
            .optional()
            .context("Failed to query blob")
    }
}

impl Store for MirrorDb {
    fn get_project(&self, id: i64) -> Result<Option<Project>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS),
                params![id],
                project_from_row,
            )
            .optional()
            .context("Failed to query project")
    }

    fn get_or_create_commit(&self, project_id: i64, sha: &str) -> Result<(Commit, bool)> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO commits (project_id, sha) VALUES (?1, ?2)",
                params![project_id, sha],
            )
            .context("Failed to insert commit")?
            == 1;

        let commit = self
            .find_commit(project_id, sha)?
            .with_context(|| format!("Commit {} missing after get-or-create", sha))?;

        if inserted {
            debug!("Created commit row {} for project {}", sha, project_id);
        }
        Ok((commit, inserted))
    }

    fn save_commit(&self, commit: &Commit) -> Result<()> {
        self.conn
            .execute(
                r#"
                UPDATE commits
                SET tree = ?2, created = ?3, name = ?4, message = ?5, url = ?6
                WHERE id = ?1
                "#,
                params![
                    commit.id,
                    commit.tree,
                    commit
                        .created
                        .map(|ts| ts.format(COMMIT_TIME_FORMAT).to_string()),
                    commit.name,
                    commit.message,
                    commit.url,
                ],
            )
            .context("Failed to save commit")?;
        Ok(())
    }

    fn get_or_create_blob(&self, commit_id: i64, name: &str, path: &str) -> Result<(Blob, bool)> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO blobs (commit_id, name, path) VALUES (?1, ?2, ?3)",
                params![commit_id, name, path],
            )
            .context("Failed to insert blob")?
            == 1;

        let blob = self
            .find_blob(commit_id, name, path)?
            .with_context(|| format!("Blob {} missing after get-or-create", path))?;

        Ok((blob, inserted))
    }

    fn save_blob(&self, blob: &Blob) -> Result<()> {
        self.conn
            .execute(
                r#"
                UPDATE blobs
                SET size = ?2, mime_type = ?3, data = ?4, sha = ?5
                WHERE id = ?1
                "#,
                params![
                    blob.id,
                    blob.size as i64,
                    blob.mime_type,
                    blob.data,
                    blob.sha,
                ],
            )
            .context("Failed to save blob")?;
        Ok(())
    }
}
