//! Chromium installation managed by `mediascout setup`.

use crate::types::{Result, ScoutError};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File names a fetched Chromium build may use for its binary.
const BINARY_NAMES: &[&str] = &[
    "chrome",
    "chromium",
    "Chromium",
    "Google Chrome",
    "chrome.exe",
    "chromium.exe",
];

/// Binary path inside a macOS application bundle.
const BUNDLE_BINARY: &str = "Contents/MacOS/Chromium";

/// A directory holding a downloaded Chromium build.
#[derive(Debug, Clone)]
pub struct ChromeInstall {
    root: PathBuf,
}

impl ChromeInstall {
    /// The install under `~/.mediascout/chrome`.
    pub fn managed() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            ScoutError::ConfigError("Could not determine home directory".to_string())
        })?;
        Ok(Self::at(home.join(".mediascout").join("chrome")))
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The installed browser binary, if any.
    pub fn executable(&self) -> Option<PathBuf> {
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if let Some(binary) = as_binary(&path) {
                    return Some(binary);
                }
                if path.is_dir() {
                    pending.push(path);
                }
            }
        }
        None
    }

    /// Download Chromium unless a binary is already present.
    ///
    /// `force` wipes the directory and downloads again.
    pub async fn install(&self, force: bool) -> Result<PathBuf> {
        if force {
            if self.root.exists() {
                info!("Removing Chromium at {:?}", self.root);
                tokio::fs::remove_dir_all(&self.root).await?;
            }
        } else if let Some(binary) = self.executable() {
            info!("Chromium already installed at {:?}", binary);
            return Ok(binary);
        }

        tokio::fs::create_dir_all(&self.root).await?;
        info!("Downloading Chromium to {:?}...", self.root);

        let options = BrowserFetcherOptions::builder()
            .with_path(&self.root)
            .build()
            .map_err(|e| {
                ScoutError::BrowserError(format!("Failed to configure browser fetcher: {}", e))
            })?;
        let fetched = BrowserFetcher::new(options).fetch().await.map_err(|e| {
            ScoutError::BrowserError(format!("Failed to download Chromium: {}", e))
        })?;

        info!("Chromium downloaded to {:?}", fetched.executable_path);
        Ok(fetched.executable_path)
    }
}

/// The managed Chromium binary, if `mediascout setup` has run.
pub fn installed_executable() -> Option<PathBuf> {
    let binary = ChromeInstall::managed().ok()?.executable();
    debug!("Managed Chromium: {:?}", binary);
    binary
}

fn as_binary(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    if name.ends_with(".app") {
        let inner = path.join(BUNDLE_BINARY);
        return inner.is_file().then_some(inner);
    }
    (BINARY_NAMES.contains(&name) && path.is_file()).then(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mediascout-{}-{}", name, std::process::id()))
    }

    #[test]
    fn test_managed_root() {
        let install = ChromeInstall::managed().unwrap();
        assert!(install.root().ends_with(".mediascout/chrome"));
    }

    #[test]
    fn test_missing_root_has_no_executable() {
        assert!(ChromeInstall::at(scratch("absent")).executable().is_none());
    }

    #[test]
    fn test_finds_nested_binary() {
        let root = scratch("nested");
        let nested = root.join("linux-1234").join("chrome-linux");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("chrome_crashpad_handler"), b"").unwrap();
        fs::write(nested.join("chrome"), b"").unwrap();

        let found = ChromeInstall::at(&root).executable().unwrap();
        assert!(found.ends_with("chrome-linux/chrome"));

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_directory_named_like_binary_is_skipped() {
        let root = scratch("dirname");
        fs::create_dir_all(root.join("chromium").join("empty")).unwrap();

        assert!(ChromeInstall::at(&root).executable().is_none());

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_app_bundle_binary() {
        let root = scratch("bundle");
        let macos = root.join("Chromium.app").join("Contents").join("MacOS");
        fs::create_dir_all(&macos).unwrap();
        fs::write(macos.join("Chromium"), b"").unwrap();

        let found = ChromeInstall::at(&root).executable().unwrap();
        assert!(found.ends_with("Contents/MacOS/Chromium"));

        fs::remove_dir_all(&root).unwrap();
    }
}
