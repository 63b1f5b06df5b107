//! Colored console output for scan sessions.

use super::ReportChannel;
use crate::types::{Report, ReportDetails, ScanResult};
use colored::Colorize;

/// Console output handler with colors and formatting.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleOutput {
    verbose: bool,
    json_mode: bool,
    quiet: bool,
}

impl ConsoleOutput {
    /// Create a new console output handler.
    pub fn new(verbose: bool, json_mode: bool, quiet: bool) -> Self {
        Self {
            verbose,
            json_mode,
            quiet,
        }
    }

    /// Print scan start message.
    pub fn print_scan_start(&self, target: &str) {
        if self.json_mode || self.quiet {
            return;
        }

        println!(
            "{} Scanning: {}",
            "[*]".bright_blue(),
            target.bright_white()
        );
    }

    /// Print scan progress (only in verbose mode).
    pub fn print_progress(&self, message: &str) {
        if self.json_mode || !self.verbose {
            return;
        }

        println!("{} {}", "[.]".dimmed(), message.dimmed());
    }

    /// Print info message.
    pub fn print_info(&self, message: &str) {
        if self.json_mode || self.quiet {
            return;
        }

        println!("{} {}", "[*]".bright_blue(), message);
    }

    /// Print a report as it arrives.
    pub fn print_report(&self, report: &Report) {
        if self.json_mode {
            return;
        }

        match &report.details {
            ReportDetails::Url { url, source } => {
                println!(
                    "{} {} {}",
                    "[+]".bright_green().bold(),
                    url.bright_white(),
                    format!("({})", source).dimmed()
                );
            }
            ReportDetails::Error { context, error } => {
                println!(
                    "{} {}: {}",
                    "[!]".red().bold(),
                    context.yellow(),
                    error
                );
            }
        }
    }

    /// Print scan summary.
    pub fn print_summary(&self, result: &ScanResult) {
        if self.json_mode {
            return;
        }

        // In quiet mode, only print targets with detections
        if self.quiet && result.urls.is_empty() {
            return;
        }

        if self.quiet {
            println!();
            println!(
                "{} Scanned: {}",
                "[*]".bright_blue(),
                result.target.bright_white()
            );
            for detected in &result.urls {
                println!("  {} {}", "[+]".bright_green(), detected.url);
            }
        }

        println!();
        println!("{}", "=== Scan Summary ===".bright_cyan());
        println!("  Target:    {}", result.target);
        println!("  Pattern:   .{}", result.pattern);
        println!("  Duration:  {:.2}s", result.duration_secs);

        if result.urls.is_empty() {
            println!("  {}", "No media resources detected.".dimmed());
        } else {
            println!(
                "  {}",
                format!("MEDIA RESOURCES FOUND: {}", result.urls.len())
                    .green()
                    .bold()
            );
        }

        if !result.errors.is_empty() {
            println!();
            println!("{}", "Errors encountered:".yellow());
            for error in &result.errors {
                println!("  - {}", error.dimmed());
            }
        }

        println!();
    }
}

impl ReportChannel for ConsoleOutput {
    fn post_message(&self, report: Report) {
        if !self.quiet {
            self.print_report(&report);
        }
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new(false, false, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DetectedUrl, SourceTag};

    #[test]
    fn test_console_output_creation() {
        let output = ConsoleOutput::new(true, false, false);
        assert!(output.verbose);
        assert!(!output.json_mode);
    }

    #[test]
    fn test_print_does_not_panic() {
        let output = ConsoleOutput::default();
        output.post_message(Report::url("https://a/x.m3u8".into(), SourceTag::MediaSrc));
        output.print_summary(&ScanResult {
            target: "https://a/".into(),
            pattern: "m3u8".into(),
            urls: vec![DetectedUrl {
                url: "https://a/x.m3u8".into(),
                source: "media-src".into(),
            }],
            duration_secs: 0.5,
            errors: vec!["timeout".into()],
        });
    }
}
