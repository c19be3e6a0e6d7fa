//! Pattern bank persistence.
//!
//! The bank lives in a single JSON file. A missing or malformed file is
//! treated as absent and replaced by a bank of free patterns; the engine
//! must come up with defaults rather than refuse to start.

use std::path::{Path, PathBuf};

use ostinato_types::{Bank, MAX_PATTERNS};

pub struct BankFile {
    pub bank: Bank,
    path: PathBuf,
}

impl BankFile {
    /// Load the bank at `path`, falling back to an empty bank of
    /// `MAX_PATTERNS` free slots.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let bank = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Bank>(&contents) {
                Ok(bank) => bank,
                Err(e) => {
                    log::warn!(
                        target: "bank",
                        "ignoring malformed bank {}: {}",
                        path.display(),
                        e
                    );
                    Bank::default()
                }
            },
            Err(_) => Bank::default(),
        };
        let mut file = Self { bank, path };
        file.sanitize();
        file
    }

    /// Keep the pattern list at its fixed size and the active index in
    /// range, whatever the file contained.
    fn sanitize(&mut self) {
        self.bank.patterns.truncate(MAX_PATTERNS);
        self.bank
            .patterns
            .resize_with(MAX_PATTERNS, Default::default);
        if self.bank.active >= MAX_PATTERNS {
            self.bank.active = 0;
        }
    }

    /// Write the bank back to its file. Failures are logged, not fatal:
    /// losing a save must not take down a running performance.
    pub fn save(&self) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&self.bank) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    log::warn!(target: "bank", "could not write {}: {}", self.path.display(), e);
                }
            }
            Err(e) => log::warn!(target: "bank", "could not serialize bank: {}", e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default bank location under the platform data directory.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ostinato")
            .join("patterns.json")
    }
}
