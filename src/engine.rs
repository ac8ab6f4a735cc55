use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::credentials::{Credential, CredentialSet};
use crate::progress::ProgressStore;
use crate::stats::Statistics;
use crate::utils;
use crate::verifier::{AttemptOutcome, Verifier};

/// Terminal state of a recovery run. The fourth terminal state, an
/// unexpected orchestration error, is carried as `Err` from
/// [`RecoveryEngine::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Unlocked(Credential),
    Exhausted,
    Interrupted,
}

/// Drives the sweep: resume-or-fresh initialization, skip logic, one
/// verifier call per untried credential, cooperative interruption between
/// attempts.
pub struct RecoveryEngine {
    database: PathBuf,
    credentials: CredentialSet,
    progress: ProgressStore,
    verifier: Verifier,
    stats: Statistics,
    interrupted: Arc<AtomicBool>,
    quiet: bool,
}

impl RecoveryEngine {
    pub fn new(
        database: PathBuf,
        credentials: CredentialSet,
        progress: ProgressStore,
        verifier: Verifier,
        interrupted: Arc<AtomicBool>,
        quiet: bool,
    ) -> Self {
        Self {
            database,
            credentials,
            progress,
            verifier,
            stats: Statistics::new(),
            interrupted,
            quiet,
        }
    }

    pub async fn run(&mut self, resume: bool) -> Result<RecoveryOutcome> {
        let resumed = resume && self.progress.load(&self.database)?;

        if resumed {
            if let Some(info) = self.progress.progress_info() {
                info!("resuming recovery of {}", self.database.display());
                info!(
                    "  started {}, {} of {} combinations tried ({:.1}%)",
                    info.started_at, info.attempts_made, info.total_combinations, info.percent
                );
            }
        } else {
            let stats = self.credentials.stats();
            self.progress.create_fresh(&self.database, stats.total)?;
            info!("starting recovery of {}", self.database.display());
            info!(
                "  {} passphrases, {} keyfiles, {} yubikey slots -> {} combinations",
                stats.passphrases, stats.keyfiles, stats.yubikey_slots, stats.total
            );
        }

        let total = self
            .progress
            .progress_info()
            .map_or(0, |info| info.total_combinations);
        let skip = self.progress.skip_count();

        let bar = if self.quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                    )
                    .unwrap()
                    .progress_chars("#>-"),
            );
            bar.set_position(skip as u64);
            bar
        };

        for (index, credential) in self.credentials.generate().enumerate() {
            // Interruption is only observed between attempts; an in-flight
            // verifier call always runs to completion or its own timeout.
            if self.interrupted.load(Ordering::SeqCst) {
                bar.abandon_with_message("interrupted");
                info!(
                    "interrupted after {} attempts this session; progress saved",
                    self.stats.attempted()
                );
                return Ok(RecoveryOutcome::Interrupted);
            }

            // Fast-forward over the prefix a previous run already covered.
            if index < skip {
                continue;
            }

            // Membership re-check in case the option order shifted between runs.
            if self.progress.is_already_tried(&credential) {
                bar.inc(1);
                continue;
            }

            bar.set_message(credential.to_string());
            let outcome = self.verifier.try_credential(&credential).await;
            self.progress.mark_tried(&credential);
            self.stats.increment_attempted();
            bar.inc(1);

            match outcome {
                AttemptOutcome::Unlocked { preview } => {
                    self.progress.mark_success(&credential);
                    bar.finish_with_message("unlocked");
                    info!("database unlocked with {}", credential);
                    info!("attempts required: {}", index + 1);
                    if !self.quiet && !preview.trim().is_empty() {
                        println!("{}", preview.trim_end());
                    }
                    self.progress.cleanup();
                    return Ok(RecoveryOutcome::Unlocked(credential));
                }
                AttemptOutcome::Rejected => {}
                AttemptOutcome::TimedOut => warn!("timeout testing {}", credential),
                AttemptOutcome::Error(e) => warn!("error testing {}: {}", credential, e),
            }
        }

        bar.finish_with_message("exhausted");
        info!(
            "no working combination found ({} attempts in {}, {:.2}/s)",
            utils::format_number(self.stats.attempted()),
            utils::format_duration(self.stats.elapsed()),
            self.stats.rate()
        );
        Ok(RecoveryOutcome::Exhausted)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_stub(dir: &Path, log: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("verify.sh");
        let body = format!(
            "#!/bin/sh\nread pw\necho \"$pw\" >> {}\nif [ \"$pw\" = \"letmein\" ]; then echo 'entries: 3'; exit 0; fi\nexit 1\n",
            log.display()
        );
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    struct Fixture {
        dir: TempDir,
        database: PathBuf,
        stub: String,
        log: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let database = dir.path().join("vault.kdbx");
        fs::write(&database, b"kdbx bytes").unwrap();
        let log = dir.path().join("attempts.log");
        let stub = write_stub(dir.path(), &log);
        Fixture {
            dir,
            database,
            stub,
            log,
        }
    }

    fn engine(fixture: &Fixture, passphrases: &[&str]) -> RecoveryEngine {
        let mut credentials = CredentialSet::new();
        credentials.add_passphrases(passphrases.iter().map(|s| s.to_string()));
        RecoveryEngine::new(
            fixture.database.clone(),
            credentials,
            ProgressStore::new(fixture.dir.path().join("progress.json")),
            Verifier::new(fixture.stub.as_str(), &fixture.database, Duration::from_secs(5)),
            Arc::new(AtomicBool::new(false)),
            true,
        )
    }

    fn logged_attempts(log: &Path) -> Vec<String> {
        fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .map(|l| l.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_unlock_stops_and_cleans_up() {
        let fixture = fixture();
        let mut engine = engine(&fixture, &["wrong1", "letmein", "never"]);

        let outcome = engine.run(false).await.unwrap();
        let expected = Credential {
            passphrase: Some("letmein".to_string()),
            keyfile: None,
            yubikey_slot: None,
        };
        assert_eq!(outcome, RecoveryOutcome::Unlocked(expected));

        // The third candidate is never sent to the verifier.
        assert_eq!(logged_attempts(&fixture.log), vec!["wrong1", "letmein"]);

        // Working progress file is gone; exactly the success summary remains.
        assert!(!fixture.dir.path().join("progress.json").exists());
        assert!(fixture.dir.path().join("progress.success.json").exists());
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let fixture = fixture();
        let mut engine = engine(&fixture, &["wrong1", "wrong2"]);

        let outcome = engine.run(false).await.unwrap();
        assert_eq!(outcome, RecoveryOutcome::Exhausted);
        assert_eq!(logged_attempts(&fixture.log).len(), 2);
        assert!(fixture.dir.path().join("progress.json").exists());
    }

    #[tokio::test]
    async fn test_resume_skips_flushed_attempts() {
        let fixture = fixture();
        let passphrases: Vec<String> = (0..12).map(|i| format!("pw{:02}", i)).collect();
        let refs: Vec<&str> = passphrases.iter().map(|s| s.as_str()).collect();

        let mut first = engine(&fixture, &refs);
        assert_eq!(first.run(false).await.unwrap(), RecoveryOutcome::Exhausted);
        assert_eq!(logged_attempts(&fixture.log).len(), 12);

        // The last flush happened at the 10-attempt boundary, so a resumed
        // run re-tries only the unflushed tail.
        let mut second = engine(&fixture, &refs);
        assert_eq!(second.run(true).await.unwrap(), RecoveryOutcome::Exhausted);

        let attempts = logged_attempts(&fixture.log);
        assert_eq!(attempts.len(), 14);
        assert_eq!(&attempts[12..], &["pw10", "pw11"]);
    }

    #[tokio::test]
    async fn test_interruption_before_first_attempt() {
        let fixture = fixture();
        let mut engine = engine(&fixture, &["wrong1", "wrong2"]);
        engine.interrupted.store(true, Ordering::SeqCst);

        let outcome = engine.run(false).await.unwrap();
        assert_eq!(outcome, RecoveryOutcome::Interrupted);
        assert!(logged_attempts(&fixture.log).is_empty());
    }
}
