//! smbfs - Mount an SMB share as a FUSE filesystem.
//!
//! Usage: smbfs smb://server/share <mountpoint> [--username NAME] [...]
//!
//! The password comes from `--password`, `SMBFS_PASSWORD`, or an interactive
//! prompt with `--ask-password`. With `--kerberos-identity` no password is
//! used at all.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use smbfs_fuse::bootstrap::{MountOptions, mount_share};
use smbfs_fuse::credentials::{CredentialProvider, NoCredentialProvider, PasswordPromptProvider};
use smbfs_fuse::daemon::SmbConfHome;
use smbfs_fuse::exit_code;
use smbfs_fuse::fuse::SmbFuse;
use smbfs_fuse::libsmbclient::LibSmbClient;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zeroize::Zeroizing;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "smbfs")]
#[command(about = "Mount an SMB share as a FUSE filesystem")]
#[command(version)]
struct Cli {
    /// Share URL, smb://server/share[/path]
    share: String,

    /// Mountpoint for the filesystem
    mount: PathBuf,

    /// Workgroup or domain
    #[arg(short, long, default_value = "")]
    workgroup: String,

    /// Account name (empty for guest)
    #[arg(short, long, default_value = "")]
    username: String,

    /// Password
    #[arg(short, long, env = "SMBFS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Prompt for the password on the terminal
    #[arg(long, conflicts_with = "password")]
    ask_password: bool,

    /// Authenticate with Kerberos as this principal
    #[arg(long)]
    kerberos_identity: Option<String>,

    /// Allow NTLM if Kerberos authentication fails
    #[arg(long)]
    allow_ntlm: bool,

    /// Connect to this IPv4 address instead of resolving the server name
    #[arg(long)]
    resolved_host: Option<Ipv4Addr>,

    /// Owner reported for all files (default: current user)
    #[arg(long)]
    uid: Option<u32>,

    /// Group reported for all files (default: current group)
    #[arg(long)]
    gid: Option<u32>,

    /// Mount without checking that the share is reachable
    #[arg(long)]
    skip_connect: bool,

    /// Ask for a new password if the server rejects the first one
    #[arg(long)]
    prompt_on_auth_failure: bool,

    /// Seconds the kernel may cache attributes
    #[arg(long)]
    attr_timeout: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // libsmbclient and the Kerberos libraries read their configuration from
    // the environment, which must be set while the process is single-threaded.
    let home = match SmbConfHome::create() {
        Ok(home) => home,
        Err(e) => {
            eprintln!("Failed to create SMB configuration directory: {e}");
            return ExitCode::from(exit_code::SOFTWARE);
        }
    };
    // SAFETY: no threads have been started yet.
    unsafe { home.apply_environment() };

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(exit_code::for_error(&e))
        }
    }
}

/// Password from the command line, environment, or prompt.
fn get_password(cli: &Cli) -> Result<Option<Zeroizing<String>>> {
    if cli.kerberos_identity.is_some() {
        return Ok(None);
    }
    if let Some(password) = &cli.password {
        return Ok(Some(Zeroizing::new(password.clone())));
    }
    if cli.ask_password {
        let password = rpassword::prompt_password(format!("Password for {}: ", cli.share))
            .context("Failed to read password")?;
        return Ok(Some(Zeroizing::new(password)));
    }
    Ok(None)
}

fn run(cli: &Cli) -> Result<()> {
    if !cli.mount.exists() {
        anyhow::bail!("Mountpoint does not exist: {}", cli.mount.display());
    }

    let uid = cli.uid.unwrap_or_else(|| nix::unistd::getuid().as_raw());
    let gid = cli.gid.unwrap_or_else(|| nix::unistd::getgid().as_raw());

    let options = MountOptions {
        share_path: cli.share.clone(),
        workgroup: cli.workgroup.clone(),
        username: cli.username.clone(),
        password: get_password(cli)?,
        kerberos_identity: cli.kerberos_identity.clone(),
        allow_ntlm: cli.allow_ntlm,
        resolved_host: cli.resolved_host.map(|ip| ip.octets().to_vec()),
        skip_connect: cli.skip_connect,
    };

    let provider: Box<dyn CredentialProvider> = if cli.prompt_on_auth_failure {
        Box::new(PasswordPromptProvider::new(
            &cli.workgroup,
            &cli.username,
            &cli.share,
        ))
    } else {
        Box::new(NoCredentialProvider)
    };

    info!(share = %cli.share, mount = %cli.mount.display(), "Mounting share");
    let allow_ntlm = cli.allow_ntlm;
    let fs = mount_share(
        &options,
        uid,
        gid,
        cli.attr_timeout.map(Duration::from_secs),
        provider,
        |shared| LibSmbClient::new(shared, allow_ntlm),
    )
    .with_context(|| format!("Failed to mount {}", cli.share))?;

    mount_and_wait(cli, SmbFuse::new(fs))
}

/// Mount the filesystem and wait for a termination signal.
fn mount_and_wait(cli: &Cli, fs: SmbFuse<LibSmbClient>) -> Result<()> {
    let share_name = cli.share.rsplit('/').next().unwrap_or("share");
    let options = vec![
        fuser::MountOption::FSName(format!("smbfs:{share_name}")),
        fuser::MountOption::Subtype("smbfs".to_string()),
        fuser::MountOption::AutoUnmount,
    ];

    let (tx, rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to set signal handler")?;

    let session = fuser::spawn_mount2(fs, &cli.mount, &options)
        .with_context(|| format!("Failed to mount at {}", cli.mount.display()))?;
    info!(mount = %cli.mount.display(), "Share mounted, press Ctrl+C to unmount");

    // A closed channel means the handler is gone; unmount either way.
    let _ = rx.recv();
    info!("Unmounting");
    drop(session);
    Ok(())
}
