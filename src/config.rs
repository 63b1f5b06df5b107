//! Configuration handling for the detector and the CLI.

use crate::types::HttpConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Pattern used when none has been configured.
pub const DEFAULT_PATTERN: &str = "m3u8";

/// Media resource detector for web pages.
#[derive(Parser, Debug, Clone)]
#[command(name = "mediascout")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Webhook endpoint receiving every report as JSON
    #[arg(long, env = "MEDIASCOUT_WEBHOOK", global = true)]
    pub webhook: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Scan pages for media resource URLs
    Scan(ScanConfig),
    /// Download and set up a managed Chromium browser
    Setup(SetupConfig),
}

/// Configuration for the setup command.
#[derive(Parser, Debug, Clone)]
pub struct SetupConfig {
    /// Force re-download even if Chromium is already installed
    #[arg(long)]
    pub force: bool,
}

/// Configuration for the scan command.
#[derive(Parser, Debug, Clone)]
pub struct ScanConfig {
    /// Target URL(s) to scan
    #[arg(required_unless_present = "file")]
    pub targets: Vec<String>,

    /// File containing URLs to scan (one per line)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Resource pattern (file extension token) to detect
    #[arg(long, default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    /// Load pages in headless Chromium and capture live network traffic
    #[arg(long)]
    pub browser: bool,

    /// Seconds to keep observing a page after it loaded
    #[arg(long, default_value = "3")]
    pub settle: u64,

    /// Let direct media requests reach the network instead of answering them locally
    #[arg(long)]
    pub no_short_circuit: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Output file path (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Maximum retries for failed requests
    #[arg(long, default_value = "3")]
    pub max_retries: u32,

    /// Custom User-Agent string
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Quiet mode: only show output for targets with detections
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Path to Chrome/Chromium executable (overrides auto-detection)
    #[arg(long)]
    pub chrome_path: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            file: None,
            pattern: DEFAULT_PATTERN.to_string(),
            browser: false,
            settle: 3,
            no_short_circuit: false,
            json: false,
            output: None,
            timeout: 30,
            max_retries: 3,
            user_agent: None,
            quiet: false,
            chrome_path: None,
        }
    }
}

impl ScanConfig {
    /// Get HTTP configuration from scan config.
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            timeout_secs: self.timeout,
            max_retries: self.max_retries,
            user_agent: self.user_agent.clone().unwrap_or_else(|| {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
            }),
        }
    }

    /// Get detector configuration from scan config.
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            pattern: self.pattern.clone(),
            short_circuit_direct_media: !self.no_short_circuit,
            ..DetectorConfig::default()
        }
    }

    /// Load targets from file if specified.
    pub fn load_targets(&self) -> crate::types::Result<Vec<String>> {
        let mut targets = self.targets.clone();

        if let Some(ref file_path) = self.file {
            let content = std::fs::read_to_string(file_path)?;
            for line in content.lines() {
                let trimmed = line.trim();
                if !trimmed.is_empty() && !trimmed.starts_with('#') {
                    targets.push(trimmed.to_string());
                }
            }
        }

        let normalized: Vec<String> = targets
            .into_iter()
            .map(|t| {
                if !t.starts_with("http://") && !t.starts_with("https://") {
                    format!("https://{}", t)
                } else {
                    t
                }
            })
            .collect();

        Ok(normalized)
    }
}

/// Tunables of a [`crate::Detector`].
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Initial resource pattern.
    pub pattern: String,
    /// Capacity of the seen-URL cache.
    pub seen_capacity: usize,
    /// Depth past which JSON values are not expanded.
    pub json_max_depth: usize,
    /// Queue length at which JSON traversal stops.
    pub json_max_queue: usize,
    /// Members enqueued per JSON object or array.
    pub json_max_members: usize,
    /// Lifetime of a cached whole-document selection.
    pub selector_ttl: Duration,
    /// Minimum gap between attribute scans of one element.
    pub attribute_throttle: Duration,
    /// Minimum gap between full scans.
    pub full_scan_interval: Duration,
    /// Delay between the first staged mutation and the drain.
    pub debounce: Duration,
    /// Base interval of the scan scheduler.
    pub scan_interval: Duration,
    /// Ceiling for the backed-off interval while the document is hidden.
    pub max_scan_interval: Duration,
    /// Delay before arming metadata watches for a new object URL.
    pub object_url_delay: Duration,
    /// Answer direct media requests locally instead of sending them.
    pub short_circuit_direct_media: bool,
    /// Nesting limit for base64 data URL decoding.
    pub max_base64_depth: u8,
    /// Opened request-with-callback objects remembered until `send`.
    pub max_open_requests: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.to_string(),
            seen_capacity: 1000,
            json_max_depth: 10,
            json_max_queue: 1000,
            json_max_members: 100,
            selector_ttl: Duration::from_secs(2),
            attribute_throttle: Duration::from_secs(1),
            full_scan_interval: Duration::from_secs(5),
            debounce: Duration::from_millis(100),
            scan_interval: Duration::from_secs(1),
            max_scan_interval: Duration::from_secs(30),
            object_url_delay: Duration::from_millis(100),
            short_circuit_direct_media: true,
            max_base64_depth: 3,
            max_open_requests: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_targets_normalizes_hosts() {
        let config = ScanConfig {
            targets: vec!["example.com".to_string(), "http://a.b/x".to_string()],
            ..Default::default()
        };
        let targets = config.load_targets().unwrap();
        assert_eq!(targets, vec!["https://example.com", "http://a.b/x"]);
    }

    #[test]
    fn test_detector_config_from_flags() {
        let config = ScanConfig {
            pattern: "flv".to_string(),
            no_short_circuit: true,
            ..Default::default()
        };
        let detector = config.detector_config();
        assert_eq!(detector.pattern, "flv");
        assert!(!detector.short_circuit_direct_media);
        assert_eq!(detector.seen_capacity, 1000);
    }

    #[test]
    fn test_cli_parses_scan() {
        let config = Config::parse_from([
            "mediascout",
            "scan",
            "https://example.com",
            "--pattern",
            "mpd",
            "--browser",
        ]);
        match config.command {
            Commands::Scan(scan) => {
                assert_eq!(scan.pattern, "mpd");
                assert!(scan.browser);
                assert_eq!(scan.settle, 3);
            }
            Commands::Setup(_) => panic!("Expected scan command"),
        }
    }
}
