use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::credentials::Credential;

/// What a single invocation of the external verifier told us.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Exit code 0: the credential opens the database. `preview` is whatever
    /// the verifier printed to stdout.
    Unlocked { preview: String },
    /// Nonzero exit: wrong credential.
    Rejected,
    /// The verifier did not finish within the per-attempt timeout.
    TimedOut,
    /// The verifier could not be spawned or driven at all.
    Error(String),
}

/// Wrapper around the external unlock oracle (`keepassxc-cli open` by
/// default). One synchronous-feeling call per credential; the timeout is
/// enforced here so a hung verifier never hangs the sweep.
pub struct Verifier {
    program: String,
    database: PathBuf,
    timeout: Duration,
}

impl Verifier {
    pub fn new(program: impl Into<String>, database: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            database: database.into(),
            timeout,
        }
    }

    /// Argument vector for one credential. The passphrase is never part of
    /// this; it goes through stdin so it cannot show up in a process listing.
    pub fn command_args(&self, credential: &Credential) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["open".into(), "--quiet".into()];
        if let Some(keyfile) = &credential.keyfile {
            args.push("--key-file".into());
            args.push(keyfile.as_os_str().to_owned());
        }
        if let Some(slot) = credential.yubikey_slot {
            args.push("--yubikey".into());
            args.push(slot.to_string().into());
        }
        if credential.passphrase.is_none() {
            args.push("--no-password".into());
        }
        args.push(self.database.as_os_str().to_owned());
        args
    }

    pub async fn try_credential(&self, credential: &Credential) -> AttemptOutcome {
        let mut command = Command::new(&self.program);
        command
            .args(self.command_args(credential))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return AttemptOutcome::Error(format!(
                    "failed to spawn {}: {}",
                    self.program, e
                ))
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Some(passphrase) = &credential.passphrase {
                let mut line = passphrase.clone().into_bytes();
                line.push(b'\n');
                // A verifier that decides early (bad keyfile, bad flags) may
                // close stdin before reading it; the exit status still rules.
                if let Err(e) = stdin.write_all(&line).await {
                    debug!("passphrase pipe closed early: {}", e);
                }
            }
            let _ = stdin.shutdown().await;
        }

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => AttemptOutcome::Unlocked {
                preview: String::from_utf8_lossy(&output.stdout).into_owned(),
            },
            Ok(Ok(_)) => AttemptOutcome::Rejected,
            Ok(Err(e)) => AttemptOutcome::Error(format!("verifier did not run: {}", e)),
            // Dropping the in-flight future reaps the child (kill_on_drop).
            Err(_) => AttemptOutcome::TimedOut,
        }
    }
}
