use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tokio::sync::watch;

use diffsync::storage::ClientIdStore;
use diffsync::synchronizer::{TextDiff, TextOperation};
use diffsync::{
    logging, with_retry, ClientDocument, ConnectionState, Edit, EndpointConfig,
    JsonPatchSynchronizer, RetryPolicy, SyncClient, SyncConfig, SyncListener, Synchronizer,
    TextSynchronizer, TransportKind, WireFormat,
};

const DEFAULT_CLIENT_ID_STORE: &str = ".diffsync/client.json";

/// Upper bound on waiting for queued frames to reach the server at exit.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "diffsync")]
#[command(about = "Differential synchronization client", version)]
struct Cli {
    /// More log output (-v, -vv, -vvv). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write logs to a daily-rotated file in this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the persistent client id, creating it if needed
    ClientId {
        #[arg(long, default_value = DEFAULT_CLIENT_ID_STORE)]
        store: PathBuf,
    },

    /// Show the edit that turns OLD into NEW
    Diff {
        old: PathBuf,
        new: PathBuf,

        /// Treat both files as JSON documents and print a JSON Patch
        #[arg(long)]
        json: bool,
    },

    /// Register a file as a document and push its content to the server
    Sync {
        #[arg(long)]
        doc_id: String,

        #[arg(short, long)]
        file: PathBuf,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<i64>,

        #[arg(long)]
        path: Option<String>,

        /// websocket or tcp
        #[arg(long)]
        transport: Option<TransportKind>,

        /// json or cbor
        #[arg(long)]
        format: Option<WireFormat>,

        /// Treat the file as a JSON document
        #[arg(long)]
        json: bool,

        /// Connection attempts before giving up
        #[arg(long, default_value_t = 1)]
        retries: u32,

        /// Keep running and write server patches back to the file
        #[arg(long)]
        follow: bool,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(cli.verbose, cli.log_dir.as_deref())?;

    match cli.command {
        Commands::ClientId { store } => {
            let id = ClientIdStore::open(&store)
                .load_or_create()
                .with_context(|| format!("client id store {}", store.display()))?;
            println!("{}", id.bright_yellow());
        }

        Commands::Diff { old, new, json } => {
            let before = read_file(&old)?;
            let after = read_file(&new)?;
            if json {
                let sync = JsonPatchSynchronizer::new();
                let edit = edit_between(&sync, parse_json(&old, &before)?, parse_json(&new, &after)?);
                println!("{}", serde_json::to_string_pretty(&edit)?);
            } else {
                let sync = TextSynchronizer::new();
                print_text_edit(&edit_between(&sync, before, after));
            }
        }

        Commands::Sync {
            doc_id,
            file,
            config,
            host,
            port,
            path,
            transport,
            format,
            json,
            retries,
            follow,
        } => {
            let mut settings = match &config {
                Some(path) => SyncConfig::load(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => SyncConfig::default(),
            };
            let overrides = EndpointConfig {
                host,
                port,
                path,
                ..Default::default()
            };
            settings.server = overrides.or(settings.server);
            if let Some(kind) = transport {
                settings.client.transport = kind;
            }
            if let Some(format) = format {
                settings.client.wire_format = format;
            }
            if settings.client.client_id_store.is_none() {
                settings.client.client_id_store = Some(DEFAULT_CLIENT_ID_STORE.into());
            }

            let raw = read_file(&file)?;
            let options = SyncOptions {
                doc_id,
                file: file.clone(),
                retries,
                follow,
            };
            if json {
                let content = parse_json(&file, &raw)?;
                run_sync(JsonPatchSynchronizer::new(), content, &settings, options, |v| {
                    Ok(serde_json::to_string_pretty(v)?)
                })
                .await?;
            } else {
                run_sync(TextSynchronizer::new(), raw, &settings, options, |s: &String| {
                    Ok(s.clone())
                })
                .await?;
            }
        }
    }

    Ok(())
}

struct SyncOptions {
    doc_id: String,
    file: PathBuf,
    retries: u32,
    follow: bool,
}

type Render<C> = fn(&C) -> Result<String>;

async fn run_sync<S: Synchronizer>(
    synchronizer: S,
    content: S::Content,
    settings: &SyncConfig,
    options: SyncOptions,
    render: Render<S::Content>,
) -> Result<()> {
    let client = SyncClient::builder(synchronizer)
        .config(settings)
        .build()
        .context("invalid sync configuration")?;

    println!(
        "{} {} as {}",
        "Connecting to".cyan().bold(),
        client.endpoint().authority().bright_white(),
        client.client_id().bright_yellow()
    );

    let policy = RetryPolicy::default().with_max_attempts(options.retries.max(1));
    let client_ref = &client;
    with_retry(&policy, || async move { client_ref.connect()?.await })
        .await
        .context("could not connect")?;
    println!("{} connected", "✓".green());

    if options.follow {
        client.subscribe(Arc::new(FileMirror {
            doc_id: options.doc_id.clone(),
            path: options.file.clone(),
            render,
        }));
    }

    let document = client.new_document(options.doc_id.clone(), content);
    client.add_document(document.clone())?;
    let version = client.diff_and_send(&document)?;
    println!(
        "{} sent {} (shadow v{})",
        "✓".green(),
        options.doc_id.bright_white(),
        version
    );

    if options.follow {
        println!("{}", "Following server patches, Ctrl-C to stop".dimmed());
        let mut state = client.watch_state();
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("listening for Ctrl-C")?,
            _ = wait_disconnected(&mut state) => {
                println!("{} connection closed by server", "!".yellow());
            }
        }
    }

    client.close(CLOSE_GRACE).await;
    Ok(())
}

async fn wait_disconnected(state: &mut watch::Receiver<ConnectionState>) {
    let _ = state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await;
}

/// Writes every server-applied version of one document back to its file.
struct FileMirror<C> {
    doc_id: String,
    path: PathBuf,
    render: Render<C>,
}

impl<C> SyncListener<C> for FileMirror<C> {
    fn on_patch_applied(&self, document: &ClientDocument<C>) -> Result<()> {
        if document.id != self.doc_id {
            return Ok(());
        }
        let rendered = (self.render)(&document.content)?;
        std::fs::write(&self.path, rendered)
            .with_context(|| format!("writing {}", self.path.display()))?;
        println!("{} {} updated from server", "↓".blue(), self.path.display());
        Ok(())
    }

    fn on_connection_state(&self, state: ConnectionState) -> Result<()> {
        tracing::info!(%state, "connection state changed");
        Ok(())
    }
}

fn edit_between<S: Synchronizer>(sync: &S, before: S::Content, after: S::Content) -> Edit<S::Diff> {
    Edit::new(0, sync.compute_diffs(&before, &after)).with_checksum(sync.checksum(&before))
}

fn print_text_edit(edit: &Edit<TextDiff>) {
    if edit.is_empty() {
        println!("{}", "no changes".dimmed());
        return;
    }
    for diff in &edit.diffs {
        match diff.operation {
            TextOperation::Unchanged => print!("{}", diff.text),
            TextOperation::Add => print!("{}", diff.text.green()),
            TextOperation::Delete => print!("{}", diff.text.red().strikethrough()),
        }
    }
    println!();
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn parse_json(path: &Path, raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).with_context(|| format!("{} is not valid JSON", path.display()))
}
