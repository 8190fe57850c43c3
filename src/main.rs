//! mega-vdrive: mount a MEGA cloud account as a local drive.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use fuser::MountOption;
use log::info;
use mega_vdrive::config::ProjectConfig;
use mega_vdrive::mega_service::MegaClient;
use mega_vdrive::vfs::{CacheManager, ConfirmDelete, Dispatcher};
use mega_vdrive::vfs::mount::MountAdapter;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "mega-vdrive", about = "Mount a MEGA account as a local drive", version)]
struct Cli {
    /// Directory to mount the drive at
    mount_point: PathBuf,

    /// Account email (overrides the settings file)
    #[arg(long)]
    email: Option<String>,

    /// Cache size boundary in bytes (overrides the settings file)
    #[arg(long)]
    cache_threshold: Option<u64>,

    /// Keep cached content on unmount even when settings say to purge
    #[arg(long)]
    keep_cache: bool,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,
}

/// Interactive confirmation for irreversible deletes of trash contents.
struct StdinConfirm;

impl ConfirmDelete for StdinConfirm {
    fn confirm(&self, description: &str) -> bool {
        eprintln!("{}", description);
        eprint!("Are you sure (y/n)? ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        answer.trim().eq_ignore_ascii_case("y")
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if !cli.mount_point.is_dir() {
        return Err(anyhow!("Mount point {} is not a directory", cli.mount_point.display()));
    }

    let config = ProjectConfig::new().context("Failed to load configuration")?;
    let settings = &config.settings;
    let email = cli
        .email
        .clone()
        .or_else(|| (!settings.email.is_empty()).then(|| settings.email.clone()))
        .ok_or_else(|| anyhow!("No account email given; pass --email or set it in the settings file"))?;
    let password = std::env::var("MEGA_PASSWORD")
        .context("MEGA_PASSWORD environment variable is not set")?;
    let threshold = cli.cache_threshold.unwrap_or(settings.cache_threshold);
    let purge_on_unmount = settings.purge_cache_on_unmount && !cli.keep_cache;

    let runtime = Runtime::new().context("Failed to start async runtime")?;

    let client = Arc::new(MegaClient::new());
    runtime
        .block_on(client.login(&email, &password))
        .context("Login failed")?;
    info!("Logged in as {}", email);

    let cache = CacheManager::new(config.content_cache_dir(), config.staging_dir(), threshold)
        .context("Failed to set up the content cache")?;
    let dispatcher = Arc::new(Dispatcher::new(
        client.clone(),
        cache,
        Box::new(StdinConfirm),
        email.clone(),
        settings.volume_label.clone(),
        runtime.handle().clone(),
    ));

    dispatcher
        .refresh()
        .map_err(|e| anyhow!("Initial node listing failed: {}", e))?;
    info!("Node mirror primed, mounting at {}", cli.mount_point.display());

    let mut options = vec![
        MountOption::FSName(email.clone()),
        MountOption::Subtype("mega-vdrive".to_string()),
        MountOption::AutoUnmount,
    ];
    if cli.allow_other {
        options.push(MountOption::AllowOther);
    }

    let adapter = MountAdapter::new(dispatcher.clone());
    let session = fuser::spawn_mount2(adapter, &cli.mount_point, &options)
        .context("Failed to mount the filesystem")?;
    let _ = dispatcher.mounted();

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("Failed to install the shutdown handler")?;

    info!("Drive mounted, press Ctrl-C to unmount");
    let _ = shutdown_rx.recv();

    info!("Unmounting");
    drop(session);
    let _ = dispatcher.unmounted(purge_on_unmount);
    if let Err(e) = runtime.block_on(client.logout()) {
        log::warn!("Logout failed: {:#}", e);
    }
    Ok(())
}
