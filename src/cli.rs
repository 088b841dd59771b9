//! Command-line interface definitions for The Daily Token.
//!
//! Provider credentials can also come from the environment.

use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

/// Generate one archived edition per day over a date range.
///
/// # Examples
///
/// ```sh
/// # Today's edition
/// daily_token -a ./output/archive
///
/// # Backfill a week, regenerating anything already on disk
/// daily_token --start 2025-03-01 --end 2025-03-07 --overwrite
///
/// # Custom model catalog
/// daily_token -c config.yaml
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// First date to generate (YYYY-MM-DD); defaults to the end date
    #[arg(short, long)]
    pub start: Option<NaiveDate>,

    /// Last date to generate (YYYY-MM-DD); defaults to today (UTC)
    #[arg(short, long)]
    pub end: Option<NaiveDate>,

    /// Regenerate days that already have an edition
    #[arg(long)]
    pub overwrite: bool,

    /// Root directory of the edition archive
    #[arg(short, long, default_value = "output/archive")]
    pub archive_root: PathBuf,

    /// Optional path to config.yaml file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// HuggingFace router token
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    /// OpenRouter API key
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub openrouter_api_key: Option<String>,

    /// Override the maximum number of stories processed per day
    #[arg(long)]
    pub max_stories: Option<usize>,

    /// Override the worker pool width
    #[arg(long)]
    pub workers: Option<usize>,

    /// Do not fall back to the credential-free emergency provider
    #[arg(long)]
    pub no_emergency: bool,
}

impl Cli {
    /// Resolve the inclusive date range against `today`.
    pub fn date_range(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), String> {
        let end = self.end.unwrap_or(today);
        let start = self.start.unwrap_or(end);
        if start > end {
            return Err(format!("start date {start} is after end date {end}"));
        }
        Ok((start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["daily_token"]);
        assert_eq!(cli.archive_root, PathBuf::from("output/archive"));
        assert!(!cli.overwrite);
        assert!(cli.config.is_none());
        let today = date(2025, 3, 14);
        assert_eq!(cli.date_range(today).unwrap(), (today, today));
    }

    #[test]
    fn test_cli_range_and_flags() {
        let cli = Cli::parse_from([
            "daily_token",
            "--start",
            "2025-03-01",
            "--end",
            "2025-03-07",
            "--overwrite",
            "-a",
            "/tmp/archive",
            "-c",
            "config.yaml",
            "--workers",
            "2",
        ]);
        assert_eq!(
            cli.date_range(date(2030, 1, 1)).unwrap(),
            (date(2025, 3, 1), date(2025, 3, 7))
        );
        assert!(cli.overwrite);
        assert_eq!(cli.archive_root, PathBuf::from("/tmp/archive"));
        assert_eq!(cli.config, Some(PathBuf::from("config.yaml")));
        assert_eq!(cli.workers, Some(2));
    }

    #[test]
    fn test_cli_rejects_inverted_range() {
        let cli = Cli::parse_from(["daily_token", "-s", "2025-03-07", "-e", "2025-03-01"]);
        assert!(cli.date_range(date(2025, 3, 14)).is_err());
    }

    #[test]
    fn test_cli_rejects_bad_date() {
        assert!(Cli::try_parse_from(["daily_token", "--start", "March 1st"]).is_err());
    }
}
