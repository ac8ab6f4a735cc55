use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use kdbx_recover::config::Config;
use kdbx_recover::credentials::CredentialSet;
use kdbx_recover::engine::{RecoveryEngine, RecoveryOutcome};
use kdbx_recover::progress::ProgressStore;
use kdbx_recover::verifier::Verifier;

/// Recover a KeePassXC database by sweeping credential combinations
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the KeePassXC database file (.kdbx)
    database: PathBuf,

    /// File with candidate passphrases (one per line, '#' comments ignored)
    #[arg(short = 'p', long)]
    passphrases: Option<PathBuf>,

    /// Individual candidate passphrase (repeatable)
    #[arg(long = "passphrase")]
    passphrase: Vec<String>,

    /// Directory whose files are tried as keyfiles
    #[arg(short = 'k', long)]
    keyfiles: Option<PathBuf>,

    /// Individual keyfile (repeatable)
    #[arg(long = "keyfile")]
    keyfile: Vec<PathBuf>,

    /// Also try YubiKey challenge-response slots
    #[arg(long)]
    yubikey: bool,

    /// Comma-separated YubiKey slots to try (default from config: 1,2)
    #[arg(long)]
    yubikey_slots: Option<String>,

    /// Also try combinations without any passphrase
    #[arg(long)]
    try_no_passphrase: bool,

    /// Also try combinations without a keyfile
    #[arg(long)]
    try_no_keyfile: bool,

    /// Progress file location
    #[arg(long)]
    progress_file: Option<PathBuf>,

    /// Start fresh even if a progress file exists
    #[arg(long)]
    no_resume: bool,

    /// Per-attempt timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// External verifier program
    #[arg(long)]
    verifier: Option<String>,

    /// Optional TOML config file with defaults for the flags above
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Suppress all output except the final result
    #[arg(short, long)]
    quiet: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.quiet, args.verbose);

    let interrupted = Arc::new(AtomicBool::new(false));
    let mut engine = match build_engine(&args, interrupted.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    };

    spawn_signal_watcher(interrupted, args.quiet);

    info!("kdbx-recover {}", kdbx_recover::VERSION);

    let code = match engine.run(!args.no_resume).await {
        Ok(RecoveryOutcome::Unlocked(credential)) => {
            println!("database unlocked with {}", credential);
            0
        }
        Ok(RecoveryOutcome::Exhausted) => {
            println!("no working combination found");
            1
        }
        Ok(RecoveryOutcome::Interrupted) => {
            eprintln!("recovery interrupted; run again with the same flags to resume");
            130
        }
        Err(e) => {
            error!("recovery failed: {:#}", e);
            eprintln!("recovery failed: {:#}", e);
            2
        }
    };
    std::process::exit(code);
}

fn init_logging(quiet: bool, verbose: bool) {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_target(false)
        .init();
}

fn build_engine(args: &Args, interrupted: Arc<AtomicBool>) -> Result<RecoveryEngine> {
    let has_source = args.passphrases.is_some()
        || !args.passphrase.is_empty()
        || args.keyfiles.is_some()
        || !args.keyfile.is_empty()
        || args.yubikey;
    if !has_source {
        anyhow::bail!(
            "no credential source: provide --passphrases/--passphrase, --keyfiles/--keyfile, or --yubikey"
        );
    }
    if !args.database.is_file() {
        anyhow::bail!("database file does not exist: {}", args.database.display());
    }

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let mut credentials = CredentialSet::new();
    if let Some(file) = &args.passphrases {
        let added = credentials.load_passphrases_from_file(file)?;
        info!("loaded {} passphrases from {}", added, file.display());
    }
    credentials.add_passphrases(args.passphrase.iter().cloned());
    if let Some(dir) = &args.keyfiles {
        let added = credentials.load_keyfiles_from_dir(dir)?;
        info!("loaded {} keyfiles from {}", added, dir.display());
    }
    credentials.add_keyfiles(args.keyfile.iter().cloned());

    if args.yubikey {
        let slots = match &args.yubikey_slots {
            Some(list) => parse_slots(list)?,
            None => config.yubikey.slots.clone(),
        };
        credentials.set_yubikey_slots(slots);
    } else if args.yubikey_slots.is_some() {
        warn!("--yubikey-slots given without --yubikey; ignoring");
    }

    credentials.try_no_passphrase(args.try_no_passphrase);
    credentials.try_no_keyfile(args.try_no_keyfile);

    if credentials.count() == 0 {
        anyhow::bail!("credential configuration yields no combinations to try");
    }

    let timeout_secs = args.timeout.unwrap_or(config.verifier.timeout_secs);
    if timeout_secs == 0 {
        anyhow::bail!("--timeout must be >= 1 second");
    }
    let program = args
        .verifier
        .clone()
        .unwrap_or_else(|| config.verifier.program.clone());
    let progress_path = args
        .progress_file
        .clone()
        .unwrap_or_else(|| config.progress.file.clone());

    Ok(RecoveryEngine::new(
        args.database.clone(),
        credentials,
        ProgressStore::new(progress_path),
        Verifier::new(program, args.database.clone(), Duration::from_secs(timeout_secs)),
        interrupted,
        args.quiet,
    ))
}

fn parse_slots(list: &str) -> Result<Vec<u8>> {
    let slots = list
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u8>().with_context(|| format!("invalid YubiKey slot: {}", s)))
        .collect::<Result<Vec<u8>>>()?;
    if slots.is_empty() {
        anyhow::bail!("--yubikey-slots must name at least one slot");
    }
    for &slot in &slots {
        if !(1..=2).contains(&slot) {
            anyhow::bail!("yubikey slot {} out of range (1-2)", slot);
        }
    }
    Ok(slots)
}

fn spawn_signal_watcher(interrupted: Arc<AtomicBool>, quiet: bool) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        if !quiet {
            eprintln!("\nstopping after the current attempt, saving progress...");
        }
        interrupted.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
