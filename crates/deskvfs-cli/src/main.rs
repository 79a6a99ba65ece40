//! deskvfs: inspect and drive the virtual filesystem from a shell.
//!
//! Usage:
//!   # Handlers from a JSON storage config
//!   deskvfs --config storage.json mounts
//!   deskvfs stat /docs/report.pdf
//!   deskvfs du --all /home
//!
//!   # Handlers from a SQLite store (import once, then reuse)
//!   deskvfs --config storage.json --db desk.db import-config
//!   deskvfs --db desk.db trash ls /docs
//!
//! Every command prints pretty JSON on stdout; logs go to stderr
//! (`RUST_LOG` overrides the default `info` level).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use deskvfs_kernel::vfs::{DirectoryProbe, MountStrategy, decode_uri};
use deskvfs_kernel::{
    DeskVfs, KvStore, SqliteKv, StaticIdentity, StorageConfig, default_strategy, format_size,
};

/// Virtual filesystem layer for a web desktop.
#[derive(Parser, Debug)]
#[command(name = "deskvfs")]
#[command(about = "Inspect and drive the deskvfs virtual filesystem")]
struct Args {
    /// Storage configuration file
    #[arg(short, long, default_value = "storage.json")]
    config: PathBuf,

    /// SQLite store holding the default mount set (used instead of --config)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Act on behalf of this user (defaults to the login name)
    #[arg(short, long)]
    user: Option<String>,

    /// Only probe mount points; never run mount(8)
    #[arg(long)]
    probe_only: bool,

    /// Percent-decode path arguments
    #[arg(long)]
    decode: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List handlers and their mount state
    Mounts,
    /// Map a virtual path to its handler and real path
    Resolve { vpath: String },
    /// Describe a file or directory
    Stat { vpath: String },
    /// Extended properties: MIME type, permissions, dirnames
    Props { vpath: String },
    /// List a directory
    Ls {
        vdir: String,
        /// Include dot files
        #[arg(short, long)]
        all: bool,
    },
    /// Recursive size of a directory
    Du {
        vpath: String,
        /// Count files below dot-prefixed folders too
        #[arg(short, long)]
        all: bool,
        #[arg(short, long, default_value_t = 2)]
        decimals: usize,
    },
    /// Find files by name pattern
    Search { pattern: String },
    /// Mount a device and bring up the handlers below it
    Mount {
        device: String,
        point: PathBuf,
        #[arg(short = 't', long = "type", default_value = "auto")]
        fs_type: String,
    },
    /// Take handlers offline and unmount
    Unmount { point: PathBuf },
    /// Recycle bin
    #[command(subcommand)]
    Trash(TrashCommand),
    /// Shortcut files
    #[command(subcommand)]
    Shortcut(ShortcutCommand),
    /// Render a byte count the way listings do
    FmtSize {
        bytes: u64,
        #[arg(short, long, default_value_t = 2)]
        decimals: usize,
    },
    /// Copy the --config file into the --db store as the default mount set
    ImportConfig,
}

#[derive(Subcommand, Debug)]
enum TrashCommand {
    /// Move an item to the trash
    Rm { vpath: String },
    /// List a handler's trash
    Ls { vroot: String },
    /// Put a trashed item back
    Restore { vpath: String },
    /// Delete a trashed item for good
    Purge { vpath: String },
    /// Purge everything in a handler's trash
    Empty { vroot: String },
}

#[derive(Subcommand, Debug)]
enum ShortcutCommand {
    /// Create a shortcut at AT pointing to TARGET
    Create {
        at: String,
        target: String,
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Show where a shortcut points
    Follow { vpath: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print(value: serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn load_config(args: &Args) -> Result<StorageConfig> {
    match &args.db {
        Some(db) => {
            let kv = SqliteKv::open(db).with_context(|| format!("opening {}", db.display()))?;
            Ok(StorageConfig::load_from_kv(&kv)?)
        }
        None => StorageConfig::load(&args.config)
            .await
            .with_context(|| format!("loading {}", args.config.display())),
    }
}

fn path_arg(args: &Args, raw: &str) -> Result<String> {
    if args.decode {
        Ok(decode_uri(raw)?)
    } else {
        Ok(raw.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    if let Command::FmtSize { bytes, decimals } = &args.command {
        return print(json!(format_size(*bytes, *decimals)));
    }

    if let Command::ImportConfig = &args.command {
        let Some(db) = &args.db else {
            bail!("import-config needs --db");
        };
        let config = StorageConfig::load(&args.config)
            .await
            .with_context(|| format!("loading {}", args.config.display()))?;
        let kv = SqliteKv::open(db).with_context(|| format!("opening {}", db.display()))?;
        config.save_to_kv(&kv)?;
        tracing::info!("imported {} storages into {}", config.storages.len(), db.display());
        let entries = kv.list("storage", "")?.len();
        return print(json!({ "imported": config.storages.len(), "entries": entries }));
    }

    let config = load_config(&args).await?;
    let user = args.user.clone().unwrap_or_else(whoami::username);
    let strategy: Arc<dyn MountStrategy> = if args.probe_only {
        Arc::new(DirectoryProbe)
    } else {
        default_strategy()
    };
    tracing::debug!(user = %user, strategy = strategy.name(), "starting");

    let vfs = DeskVfs::from_config(&config, strategy, Arc::new(StaticIdentity::single(user))).await;

    run(&args, &vfs).await
}

async fn run(args: &Args, vfs: &DeskVfs) -> Result<()> {
    match &args.command {
        Command::Mounts => {
            let mounts: Vec<_> = vfs
                .mounts()
                .await
                .into_iter()
                .map(|info| json!({ "handler": info.handler.as_ref(), "state": info.state }))
                .collect();
            print(json!(mounts))
        }
        Command::Resolve { vpath } => {
            let resolved = vfs.resolve(&path_arg(args, vpath)?).await?;
            print(json!({
                "handler": resolved.handler.id,
                "vpath": resolved.vpath,
                "real": resolved.real,
            }))
        }
        Command::Stat { vpath } => print(json!(vfs.stat(&path_arg(args, vpath)?).await?)),
        Command::Props { vpath } => print(json!(vfs.properties(&path_arg(args, vpath)?).await?)),
        Command::Ls { vdir, all } => print(json!(vfs.list(&path_arg(args, vdir)?, *all).await?)),
        Command::Du { vpath, all, decimals } => {
            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_ctrl_c.cancel();
                }
            });
            let size = vfs
                .directory_size_cancellable(&path_arg(args, vpath)?, *all, cancel)
                .await?;
            print(json!({
                "bytes": size.bytes,
                "files": size.files,
                "skipped": size.skipped,
                "partial": size.is_partial(),
                "display": format_size(size.bytes, *decimals),
            }))
        }
        Command::Search { pattern } => print(json!(vfs.search(&path_arg(args, pattern)?).await?)),
        Command::Mount { device, point, fs_type } => {
            let outcome = vfs.mount(point, device, fs_type).await?;
            print(json!({ "point": point, "outcome": outcome }))
        }
        Command::Unmount { point } => {
            let unmounted = vfs.unmount(point).await?;
            print(json!({ "point": point, "unmounted": unmounted }))
        }
        Command::Trash(cmd) => trash(args, vfs, cmd).await,
        Command::Shortcut(cmd) => shortcut(args, vfs, cmd).await,
        Command::FmtSize { .. } | Command::ImportConfig => unreachable_command(),
    }
}

async fn trash(args: &Args, vfs: &DeskVfs, cmd: &TrashCommand) -> Result<()> {
    match cmd {
        TrashCommand::Rm { vpath } => print(json!(vfs.trash(&path_arg(args, vpath)?).await?)),
        TrashCommand::Ls { vroot } => {
            print(json!(vfs.list_trash(&path_arg(args, vroot)?).await?))
        }
        TrashCommand::Restore { vpath } => {
            let restored = vfs.restore(&path_arg(args, vpath)?).await?;
            print(json!({ "restored": restored }))
        }
        TrashCommand::Purge { vpath } => {
            let vpath = path_arg(args, vpath)?;
            vfs.purge(&vpath).await?;
            print(json!({ "purged": vpath }))
        }
        TrashCommand::Empty { vroot } => {
            let purged = vfs.empty_trash(&path_arg(args, vroot)?).await?;
            print(json!({ "purged": purged }))
        }
    }
}

async fn shortcut(args: &Args, vfs: &DeskVfs, cmd: &ShortcutCommand) -> Result<()> {
    match cmd {
        ShortcutCommand::Create { at, target, name } => {
            let (vpath, record) = vfs
                .create_shortcut(&path_arg(args, at)?, &path_arg(args, target)?, name.as_deref())
                .await?;
            print(json!({ "vpath": vpath, "record": record }))
        }
        ShortcutCommand::Follow { vpath } => {
            let vpath = path_arg(args, vpath)?;
            let record = vfs.read_shortcut(&vpath).await?;
            let target = vfs.follow_shortcut(&vpath).await?;
            print(json!({
                "record": record,
                "target": target.vpath,
                "real": target.real,
                "handler": target.handler.id,
            }))
        }
    }
}

fn unreachable_command() -> Result<()> {
    bail!("command handled before the filesystem was loaded")
}
