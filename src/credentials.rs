use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One trial unit: a combination of unlock factors to present to the
/// verifier. At least one field is `Some` for every generated value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credential {
    pub passphrase: Option<String>,
    pub keyfile: Option<PathBuf>,
    pub yubikey_slot: Option<u8>,
}

impl Credential {
    pub fn is_empty(&self) -> bool {
        self.passphrase.is_none() && self.keyfile.is_none() && self.yubikey_slot.is_none()
    }
}

impl fmt::Display for Credential {
    /// Log-safe rendering: the passphrase itself is never shown.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.passphrase.is_some() {
            parts.push("passphrase='***'".to_string());
        }
        if let Some(keyfile) = &self.keyfile {
            let name = keyfile
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| keyfile.display().to_string());
            parts.push(format!("keyfile='{}'", name));
        }
        if let Some(slot) = self.yubikey_slot {
            parts.push(format!("yubikey_slot={}", slot));
        }
        write!(f, "Credential({})", parts.join(", "))
    }
}

/// Per-factor counts for the startup banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialStats {
    pub passphrases: usize,
    pub keyfiles: usize,
    pub yubikey_slots: usize,
    pub total: usize,
}

/// Enumeration configuration. Built up from CLI flags before the run starts;
/// read-only while the sweep iterates.
#[derive(Debug, Clone)]
pub struct CredentialSet {
    passphrases: Vec<String>,
    keyfiles: Vec<PathBuf>,
    yubikey_slots: Vec<u8>,
    try_no_passphrase: bool,
    try_no_keyfile: bool,
    try_no_yubikey: bool,
}

impl Default for CredentialSet {
    fn default() -> Self {
        Self {
            passphrases: Vec::new(),
            keyfiles: Vec::new(),
            yubikey_slots: Vec::new(),
            try_no_passphrase: false,
            try_no_keyfile: false,
            // A keyfile-only or passphrase-only database is the common case.
            try_no_yubikey: true,
        }
    }
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_passphrases<I>(&mut self, passphrases: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.passphrases.extend(passphrases);
    }

    /// Load candidate passphrases from a wordlist, one per line. Blank lines
    /// and `#` comments are skipped, surrounding whitespace is trimmed.
    pub fn load_passphrases_from_file(&mut self, path: &Path) -> Result<usize> {
        let file = File::open(path)
            .with_context(|| format!("failed to open passphrase file: {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut added = 0;
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            self.passphrases.push(trimmed.to_string());
            added += 1;
        }
        Ok(added)
    }

    pub fn add_keyfiles<I>(&mut self, keyfiles: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.keyfiles.extend(keyfiles);
    }

    /// Treat every regular file in `dir` as a candidate keyfile, sorted by
    /// name so the enumeration order is stable across runs.
    pub fn load_keyfiles_from_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            anyhow::bail!("keyfile directory does not exist: {}", dir.display());
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(dir)
            .with_context(|| format!("failed to read keyfile directory: {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() {
                found.push(path);
            }
        }
        found.sort();

        let added = found.len();
        self.keyfiles.extend(found);
        Ok(added)
    }

    pub fn set_yubikey_slots(&mut self, slots: Vec<u8>) {
        self.yubikey_slots = slots;
        // Slot-less combinations stay in the sweep: the database may not use
        // challenge-response at all.
    }

    pub fn try_no_passphrase(&mut self, enabled: bool) {
        self.try_no_passphrase = enabled;
    }

    pub fn try_no_keyfile(&mut self, enabled: bool) {
        self.try_no_keyfile = enabled;
    }

    fn passphrase_options(&self) -> Vec<Option<String>> {
        let mut options: Vec<Option<String>> =
            self.passphrases.iter().cloned().map(Some).collect();
        let other_factors = !self.keyfiles.is_empty() || !self.yubikey_slots.is_empty();
        // No passphrases configured but other factors present: the database
        // may be keyfile/token-only, so the absent option is implied.
        if self.try_no_passphrase || (self.passphrases.is_empty() && other_factors) {
            options.push(None);
        }
        options
    }

    fn keyfile_options(&self) -> Vec<Option<PathBuf>> {
        let mut options: Vec<Option<PathBuf>> = self.keyfiles.iter().cloned().map(Some).collect();
        if self.try_no_keyfile || self.keyfiles.is_empty() {
            options.push(None);
        }
        options
    }

    fn yubikey_options(&self) -> Vec<Option<u8>> {
        let mut options: Vec<Option<u8>> = self.yubikey_slots.iter().copied().map(Some).collect();
        if self.try_no_yubikey {
            options.push(None);
        }
        options
    }

    /// Lazy cross-product of all configured factor options, in insertion
    /// order (passphrases outer, then keyfiles, then slots). The all-absent
    /// triple is never yielded. Calling this twice with an unchanged set
    /// produces an identical sequence, which the positional resume skip
    /// relies on.
    pub fn generate(&self) -> impl Iterator<Item = Credential> {
        let passphrases = self.passphrase_options();
        let keyfiles = self.keyfile_options();
        let slots = self.yubikey_options();

        passphrases
            .into_iter()
            .flat_map(move |passphrase| {
                let keyfiles = keyfiles.clone();
                let slots = slots.clone();
                keyfiles.into_iter().flat_map(move |keyfile| {
                    let passphrase = passphrase.clone();
                    let slots = slots.clone();
                    slots.into_iter().map(move |slot| Credential {
                        passphrase: passphrase.clone(),
                        keyfile: keyfile.clone(),
                        yubikey_slot: slot,
                    })
                })
            })
            .filter(|credential| !credential.is_empty())
    }

    /// Total combinations `generate()` will yield, in closed form.
    pub fn count(&self) -> usize {
        let passphrases = self.passphrase_options();
        let keyfiles = self.keyfile_options();
        let slots = self.yubikey_options();

        let total = passphrases.len() * keyfiles.len() * slots.len();
        let yields_all_absent =
            passphrases.contains(&None) && keyfiles.contains(&None) && slots.contains(&None);
        if yields_all_absent {
            total - 1
        } else {
            total
        }
    }

    pub fn stats(&self) -> CredentialStats {
        CredentialStats {
            passphrases: self.passphrases.len(),
            keyfiles: self.keyfiles.len(),
            yubikey_slots: self.yubikey_slots.len(),
            total: self.count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn passphrases(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_passphrases_only() {
        let mut set = CredentialSet::new();
        set.add_passphrases(passphrases(&["a", "b", "c"]));

        let generated: Vec<_> = set.generate().collect();
        assert_eq!(generated.len(), 3);
        assert_eq!(set.count(), 3);
        assert!(generated.iter().all(|c| c.passphrase.is_some()));
        assert!(generated.iter().all(|c| c.keyfile.is_none()));
        assert!(generated.iter().all(|c| c.yubikey_slot.is_none()));
    }

    #[test]
    fn test_absent_options_drop_all_absent_triple() {
        // (2 passphrases + none) x (1 keyfile + none) x (no slot) - all-absent
        let mut set = CredentialSet::new();
        set.add_passphrases(passphrases(&["a", "b"]));
        set.add_keyfiles(vec![PathBuf::from("key.bin")]);
        set.try_no_passphrase(true);
        set.try_no_keyfile(true);

        let generated: Vec<_> = set.generate().collect();
        assert_eq!(generated.len(), 5);
        assert_eq!(set.count(), 5);
        assert!(generated.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn test_count_matches_generate_across_configurations() {
        let mut configs = Vec::new();

        let mut set = CredentialSet::new();
        set.add_passphrases(passphrases(&["a"]));
        configs.push(set);

        let mut set = CredentialSet::new();
        set.add_passphrases(passphrases(&["a", "b"]));
        set.set_yubikey_slots(vec![1, 2]);
        configs.push(set);

        let mut set = CredentialSet::new();
        set.add_keyfiles(vec![PathBuf::from("k1"), PathBuf::from("k2")]);
        set.set_yubikey_slots(vec![1]);
        configs.push(set);

        let mut set = CredentialSet::new();
        set.add_passphrases(passphrases(&["a", "b", "c"]));
        set.add_keyfiles(vec![PathBuf::from("k")]);
        set.try_no_passphrase(true);
        set.try_no_keyfile(true);
        configs.push(set);

        for set in configs {
            assert_eq!(set.count(), set.generate().count());
        }
    }

    #[test]
    fn test_empty_configuration_yields_nothing() {
        let set = CredentialSet::new();
        assert_eq!(set.count(), 0);
        assert_eq!(set.generate().count(), 0);
    }

    #[test]
    fn test_keyfile_only_implies_no_passphrase() {
        let mut set = CredentialSet::new();
        set.add_keyfiles(vec![PathBuf::from("key.bin")]);

        let generated: Vec<_> = set.generate().collect();
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].passphrase, None);
        assert_eq!(generated[0].keyfile, Some(PathBuf::from("key.bin")));
    }

    #[test]
    fn test_generation_order_is_stable() {
        let mut set = CredentialSet::new();
        set.add_passphrases(passphrases(&["a", "b"]));
        set.add_keyfiles(vec![PathBuf::from("k1"), PathBuf::from("k2")]);
        set.set_yubikey_slots(vec![1, 2]);
        set.try_no_passphrase(true);
        set.try_no_keyfile(true);

        let first: Vec<_> = set.generate().collect();
        let second: Vec<_> = set.generate().collect();
        assert_eq!(first, second);

        // Passphrases vary slowest: every "a" combination precedes every "b".
        assert_eq!(first[0].passphrase, Some("a".to_string()));
        let last_a = first
            .iter()
            .rposition(|c| c.passphrase == Some("a".to_string()))
            .unwrap();
        let first_b = first
            .iter()
            .position(|c| c.passphrase == Some("b".to_string()))
            .unwrap();
        assert!(last_a < first_b);
    }

    #[test]
    fn test_stats() {
        let mut set = CredentialSet::new();
        set.add_passphrases(passphrases(&["a", "b"]));
        set.add_keyfiles(vec![PathBuf::from("k")]);
        set.set_yubikey_slots(vec![1, 2]);

        let stats = set.stats();
        assert_eq!(stats.passphrases, 2);
        assert_eq!(stats.keyfiles, 1);
        assert_eq!(stats.yubikey_slots, 2);
        assert_eq!(stats.total, set.generate().count());
    }

    #[test]
    fn test_load_passphrases_skips_comments_and_blanks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# header comment").unwrap();
        writeln!(file, "hunter2").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  spaced  ").unwrap();
        file.flush().unwrap();

        let mut set = CredentialSet::new();
        let added = set.load_passphrases_from_file(file.path()).unwrap();
        assert_eq!(added, 2);

        let generated: Vec<_> = set.generate().collect();
        assert_eq!(generated[0].passphrase, Some("hunter2".to_string()));
        assert_eq!(generated[1].passphrase, Some("spaced".to_string()));
    }

    #[test]
    fn test_load_keyfiles_from_dir_sorted() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.key"), b"b").unwrap();
        std::fs::write(dir.path().join("a.key"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let mut set = CredentialSet::new();
        let added = set.load_keyfiles_from_dir(dir.path()).unwrap();
        assert_eq!(added, 2);

        let generated: Vec<_> = set.generate().collect();
        assert_eq!(generated[0].keyfile, Some(dir.path().join("a.key")));
        assert_eq!(generated[1].keyfile, Some(dir.path().join("b.key")));
    }

    #[test]
    fn test_load_keyfiles_missing_dir_fails() {
        let mut set = CredentialSet::new();
        assert!(set
            .load_keyfiles_from_dir(Path::new("/nonexistent/keyfiles"))
            .is_err());
    }

    #[test]
    fn test_display_redacts_passphrase() {
        let credential = Credential {
            passphrase: Some("supersecret".to_string()),
            keyfile: Some(PathBuf::from("/keys/master.key")),
            yubikey_slot: Some(2),
        };
        let rendered = credential.to_string();
        assert!(!rendered.contains("supersecret"));
        assert!(rendered.contains("***"));
        assert!(rendered.contains("master.key"));
        assert!(rendered.contains("yubikey_slot=2"));
    }
}
