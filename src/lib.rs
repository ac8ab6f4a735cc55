// lib.rs - KeePassXC database recovery library

pub mod config;
pub mod credentials;
pub mod engine;
pub mod progress;
pub mod stats;
pub mod verifier;

// Re-exports for convenience
pub use config::Config;
pub use credentials::{Credential, CredentialSet, CredentialStats};
pub use engine::{RecoveryEngine, RecoveryOutcome};
pub use progress::{ProgressRecord, ProgressStore};
pub use stats::Statistics;
pub use verifier::{AttemptOutcome, Verifier};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Utilities module
pub mod utils {

    /// Format duration in human-readable format
    pub fn format_duration(seconds: f64) -> String {
        if seconds < 60.0 {
            format!("{:.1}s", seconds)
        } else if seconds < 3600.0 {
            format!("{:.1}m", seconds / 60.0)
        } else if seconds < 86400.0 {
            format!("{:.1}h", seconds / 3600.0)
        } else {
            format!("{:.1}d", seconds / 86400.0)
        }
    }

    /// Format number with thousands separator
    pub fn format_number(n: u64) -> String {
        let s = n.to_string();
        let mut result = String::new();
        for (i, c) in s.chars().rev().enumerate() {
            if i > 0 && i % 3 == 0 {
                result.push(',');
            }
            result.push(c);
        }
        result.chars().rev().collect()
    }
}
