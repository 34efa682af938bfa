use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ghmirror::config::LoggingConfig;
use ghmirror::{
    handle_push, Config, FailSoft, GithubClient, MirrorDb, SyncEngine, SyncError, SyncOptions,
};

#[derive(Parser)]
#[command(name = "ghmirror")]
#[command(about = "Mirror GitHub commits and file trees into a local database")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also log to the console
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch new commits and the latest tree from GitHub
    Fetch {
        /// Only fetch projects tracking this repository
        repo: Option<String>,

        /// Fetch every project
        #[arg(long)]
        all: bool,
    },

    /// Manage projects
    Project {
        #[command(subcommand)]
        project_command: ProjectCommands,
    },

    /// List the commits of a project, newest first
    Commits {
        slug: String,
    },

    /// List the files of a project's latest commit
    Files {
        slug: String,
    },

    /// Show one file of a project's latest commit
    Show {
        slug: String,
        path: String,

        /// Write the raw content to stdout
        #[arg(long)]
        download: bool,
    },

    /// Re-fetch a single commit from GitHub
    Refresh {
        slug: String,
        sha: String,
    },

    /// Create or read anonymous gists
    Gist {
        #[command(subcommand)]
        gist_command: GistCommands,
    },

    /// Manage authentication
    Auth {
        #[command(subcommand)]
        auth_command: AuthCommands,
    },

    /// Process a push hook payload
    Hook {
        /// Secret key presented by the caller
        #[arg(long)]
        key: String,

        /// Payload file (reads stdin when omitted)
        #[arg(long)]
        payload: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Track a repository
    Add {
        #[arg(long)]
        title: String,

        /// Repository name under the configured account
        #[arg(long)]
        repo: String,

        #[arg(long, default_value = "")]
        description: String,
    },

    /// List tracked projects
    List,
}

#[derive(Subcommand)]
enum GistCommands {
    /// Upload a file as a new gist
    Create {
        file: PathBuf,

        /// Gist file name (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = ".txt")]
        ext: String,
    },

    /// Print the raw text of a gist
    Get {
        id: String,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Test the configured credentials
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first, the log file location lives there
    let config = load_config(cli.config.as_deref())?;

    let _guard = init_logging(&config.logging, cli.verbose)?;
    info!("Starting ghmirror v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Fetch { repo, all } => cmd_fetch(repo, all, &config).await,
        Commands::Project { project_command } => cmd_project(project_command, &config),
        Commands::Commits { slug } => cmd_commits(&slug, &config),
        Commands::Files { slug } => cmd_files(&slug, &config),
        Commands::Show {
            slug,
            path,
            download,
        } => cmd_show(&slug, &path, download, &config),
        Commands::Refresh { slug, sha } => cmd_refresh(&slug, &sha, &config).await,
        Commands::Gist { gist_command } => cmd_gist(gist_command, &config).await,
        Commands::Auth { auth_command } => cmd_auth(auth_command, &config).await,
        Commands::Hook { key, payload } => cmd_hook(&key, payload.as_deref(), &config).await,
    }
}

/// Log to the configured file, and to stderr as well when verbose.
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let log_file = Path::new(&logging.file);
    let log_dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", logging.file))?;

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", log_dir))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, file_name));

    let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
    let console_layer = verbose.then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(filter)
        .init();

    Ok(guard)
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

fn find_project(db: &MirrorDb, slug: &str) -> Result<ghmirror::Project> {
    db.get_project_by_slug(slug)?
        .with_context(|| format!("No project with slug \"{}\"", slug))
}

/// Batch fetch: one sync per project, failures are reported and skipped
async fn cmd_fetch(repo: Option<String>, all: bool, config: &Config) -> Result<()> {
    let db = MirrorDb::open(config)?;

    let projects = match (repo, all) {
        (_, true) => db.list_projects()?,
        (Some(repo), false) => db.projects_for_repo(&repo)?,
        (None, false) => bail!("Specify a repository or --all"),
    };

    let client = GithubClient::from_config(config)?;
    let engine = SyncEngine::new(&client, &db, SyncOptions::from_config(config));

    info!("Fetching {} repos", projects.len());
    let batch_start = Instant::now();

    for project in &projects {
        info!("Processing: {}...", project.title);
        let start = Instant::now();

        match engine.sync_project(project).await {
            Ok(processed) => {
                info!(
                    "{} new commits processed (took {:.2}s)",
                    processed.len(),
                    start.elapsed().as_secs_f64()
                );
                println!("📥 {}: {} new commits", project.title, processed.len());
            }
            Err(SyncError::Config(msg)) => {
                warn!("Skipping {}: {}", project.title, msg);
                println!("⏭️  {}: {}", project.title, msg);
            }
            Err(e) => {
                error!("Failed to sync {}: {}", project.title, e);
                println!("❌ {}: {}", project.title, e);
            }
        }
    }

    info!(
        "Fetched {} repos in {:.2}s",
        projects.len(),
        batch_start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn cmd_project(project_command: ProjectCommands, config: &Config) -> Result<()> {
    let db = MirrorDb::open(config)?;

    match project_command {
        ProjectCommands::Add {
            title,
            repo,
            description,
        } => {
            let project = db.create_project(&title, &description, &repo)?;
            println!("✅ Added project {} ({})", project.title, project.slug);
            let url = project.github_url(&config.github.login);
            if !url.is_empty() {
                println!("   {}", url);
            }
        }
        ProjectCommands::List => {
            let projects = db.list_projects()?;
            println!("Projects ({}):", projects.len());
            for project in projects {
                println!("📁 {} [{}]", project.title, project.slug);
                if !project.description.is_empty() {
                    println!("   📝 {}", project.description);
                }
                let clone = project.clone_command(&config.github.login);
                if !clone.is_empty() {
                    println!("   {}", clone);
                }
                if let Some(latest) = db.latest_commit(project.id)? {
                    println!("   Latest: {} {}", short_sha(&latest.sha), first_line(&latest.message));
                }
            }
        }
    }

    Ok(())
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}

fn cmd_commits(slug: &str, config: &Config) -> Result<()> {
    let db = MirrorDb::open(config)?;
    let project = find_project(&db, slug)?;

    for commit in db.list_commits(project.id)? {
        let created = commit
            .created
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  {}  {}",
            short_sha(&commit.sha),
            created,
            commit.name,
            first_line(&commit.message)
        );
    }

    Ok(())
}

fn cmd_files(slug: &str, config: &Config) -> Result<()> {
    let db = MirrorDb::open(config)?;
    let project = find_project(&db, slug)?;
    let Some(latest) = db.latest_commit(project.id)? else {
        println!("No commits mirrored for {}", project.title);
        return Ok(());
    };

    for blob in db.list_blobs(latest.id)? {
        let marker = if blob.is_pending() { " (pending)" } else { "" };
        println!("{:>8}  {}{}", blob.size, blob.path, marker);
    }

    Ok(())
}

fn cmd_show(slug: &str, path: &str, download: bool, config: &Config) -> Result<()> {
    let db = MirrorDb::open(config)?;
    let project = find_project(&db, slug)?;
    let latest = db
        .latest_commit(project.id)?
        .with_context(|| format!("No commits mirrored for {}", project.title))?;
    let blob = db
        .get_blob_by_path(latest.id, path)?
        .with_context(|| format!("No file {} in {}", path, project.title))?;

    if download {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(blob.data.as_bytes())
            .context("Failed to write file content")?;
        return Ok(());
    }

    println!("📄 {}", blob.path);
    println!("   Commit: {}", latest.sha);
    println!("   Size: {} bytes", blob.size);
    println!("   Type: {}", blob.mime_type);
    println!("   SHA: {}", blob.sha);
    Ok(())
}

async fn cmd_refresh(slug: &str, sha: &str, config: &Config) -> Result<()> {
    let db = MirrorDb::open(config)?;
    let project = find_project(&db, slug)?;
    let mut commit = db
        .find_commit(project.id, sha)?
        .with_context(|| format!("No commit {} in {}", sha, project.title))?;

    let client = GithubClient::from_config(config)?;
    let engine = SyncEngine::new(&client, &db, SyncOptions::from_config(config));

    if engine.refresh_commit(&mut commit).await? {
        println!("✅ Refreshed {}", commit.sha);
    } else {
        println!("⚠️  GitHub returned nothing for {}", commit.sha);
    }
    Ok(())
}

async fn cmd_gist(gist_command: GistCommands, config: &Config) -> Result<()> {
    let client = GithubClient::from_config(config)?;

    match gist_command {
        GistCommands::Create { file, name, ext } => {
            let data = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {:?}", file))?;
            let name = name.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });

            match client.create_gist(&name, &data, &ext).await.fail_soft("gist creation") {
                Some(id) => println!("✅ Created gist {}", id),
                None => println!("❌ Gist creation failed"),
            }
        }
        GistCommands::Get { id } => {
            let text = client
                .get_gist(&id)
                .await
                .with_context(|| format!("Failed to fetch gist {}", id))?;
            print!("{}", text);
        }
    }

    Ok(())
}

async fn cmd_auth(auth_command: AuthCommands, config: &Config) -> Result<()> {
    match auth_command {
        AuthCommands::Test => {
            let client = GithubClient::from_config(config)?;
            match client.authenticate().await {
                Ok(user) => {
                    println!("✅ Authentication successful");
                    println!("   Login: {}", user.login.as_deref().unwrap_or(client.login()));
                    if let Some(name) = user.name {
                        println!("   Name: {}", name);
                    }
                    if let Some(repos) = user.public_repo_count {
                        println!("   Public repos: {}", repos);
                    }
                }
                Err(e) => {
                    println!("❌ Authentication failed: {}", e);
                }
            }
        }
    }

    Ok(())
}

async fn cmd_hook(key: &str, payload: Option<&Path>, config: &Config) -> Result<()> {
    let body = match payload {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read payload {:?}", path))?,
        None => {
            let mut body = String::new();
            tokio::io::stdin()
                .read_to_string(&mut body)
                .await
                .context("Failed to read payload from stdin")?;
            body
        }
    };

    let db = MirrorDb::open(config)?;
    let client = GithubClient::from_config(config)?;
    let engine = SyncEngine::new(&client, &db, SyncOptions::from_config(config));

    let reply = handle_push(&engine, &db, &config.webhook.secret_key, key, &body).await;
    println!("{} {}", reply.status(), reply.body());
    Ok(())
}
