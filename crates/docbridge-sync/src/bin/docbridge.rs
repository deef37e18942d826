//! docbridge: publish Markdown notes to the remote document platform.
//!
//! Credentials are read from (and refreshed tokens written back to) the JSON
//! file named by `DOCBRIDGE_CREDENTIALS`. When the token pair needs
//! re-authorization, the file is polled and a fresh
//! `{"access_token": .., "refresh_token": ..}` written there resumes the run.
//! Set `DOCBRIDGE_INTERACTIVE=false` to fail fast instead. Remaining settings
//! come from the environment, optionally loaded from a `.env` file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use docbridge_sync::{
    defaults, AuthSignal, FileCredentialStore, FsContentSource, HttpDocumentApi,
    LogAuthorizationPrompt, PendingContent, PublishResult, Publisher, RemoteConfig, RestClient,
    SyncConfig, TokenManager, TracingProgress,
};

#[derive(Parser)]
#[command(name = "docbridge")]
#[command(author, version, about = "Publish Markdown notes as cloud documents")]
#[command(propagate_version = true)]
struct Cli {
    /// Credential file holding the OAuth token pair
    #[arg(long, env = "DOCBRIDGE_CREDENTIALS", default_value = "docbridge-credentials.json")]
    credentials: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a note as a new document
    Publish {
        /// Markdown file to publish
        file: PathBuf,

        /// Document title (default: file name without extension)
        #[arg(short, long)]
        title: Option<String>,

        /// JSON file listing the note's pending contents
        #[arg(short, long)]
        contents: Option<PathBuf>,
    },

    /// Replace the content of an existing document
    Update {
        /// Document or wiki URL (or a bare document id)
        url: String,

        /// Markdown file with the new content
        file: PathBuf,

        /// Document title (default: file name without extension)
        #[arg(short, long)]
        title: Option<String>,

        /// JSON file listing the note's pending contents
        #[arg(short, long)]
        contents: Option<PathBuf>,
    },

    /// Print the OAuth authorization URL
    AuthUrl,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config = SyncConfig::from_env();
    let rest = Arc::new(RestClient::new(RemoteConfig::from_env())?);
    let store = FileCredentialStore::new(&cli.credentials);
    let signal = AuthSignal::new();
    // Re-authorization completes when a fresh token pair lands in the file.
    let _watcher = if config.interactive {
        info!(
            path = %store.path().display(),
            "Write the authorized token pair to this file to resume after re-authorization"
        );
        Some(
            store
                .watch(signal.clone(), defaults::CREDENTIAL_POLL_INTERVAL)
                .await,
        )
    } else {
        None
    };
    let tokens = TokenManager::load(
        rest.clone(),
        Arc::new(store),
        Arc::new(LogAuthorizationPrompt),
        signal,
    )
    .await
    .with_context(|| format!("loading credentials from {}", cli.credentials.display()))?
    .with_reauth_timing(config.reauth_timeout, defaults::REAUTH_SETTLE_DELAY);

    match cli.command {
        Commands::Publish {
            file,
            title,
            contents,
        } => {
            let (title, content, pending) = load_note(&file, title, contents.as_deref()).await?;
            let publisher = publisher(rest, tokens, &file, config);
            let result = publisher.publish(&title, &content, &pending).await;
            report(&result)
        }
        Commands::Update {
            url,
            file,
            title,
            contents,
        } => {
            let (title, content, pending) = load_note(&file, title, contents.as_deref()).await?;
            let publisher = publisher(rest, tokens, &file, config);
            let result = publisher
                .update_existing(&url, &title, &content, &pending)
                .await;
            report(&result)
        }
        Commands::AuthUrl => cmd_auth_url(&tokens),
    }
}

fn publisher(rest: Arc<RestClient>, tokens: TokenManager, file: &Path, config: SyncConfig) -> Publisher {
    let vault = file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let api = HttpDocumentApi::new(rest, tokens.clone());
    Publisher::new(
        Arc::new(api),
        Arc::new(tokens),
        Arc::new(FsContentSource::new(vault)),
        config,
    )
    .with_progress(Arc::new(TracingProgress))
}

async fn load_note(
    file: &Path,
    title: Option<String>,
    contents: Option<&Path>,
) -> Result<(String, String, Vec<PendingContent>)> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let title = title.unwrap_or_else(|| {
        file.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string())
    });
    let pending = match contents {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => Vec::new(),
    };
    Ok((title, content, pending))
}

fn report(result: &PublishResult) -> Result<bool> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(result.success)
}

fn cmd_auth_url(tokens: &TokenManager) -> Result<bool> {
    println!("{}", tokens.authorization_url()?);
    Ok(true)
}
