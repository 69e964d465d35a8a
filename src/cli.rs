//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;

use bibresolve_core::config::{DEFAULT_CONCURRENCY, DEFAULT_L1_CAPACITY, DEFAULT_L1_TTL, DEFAULT_L2_TTL};
use bibresolve_core::{EngineConfig, KeyPattern, SourceConfig};

use crate::app_config::FileConfig;

/// Resolve DOIs into citation records.
///
/// Reads identifiers from the arguments or, when none are given, from stdin
/// (one per line). Prints the batch report as JSON on stdout.
///
/// Exit status: 0 when every identifier resolved, 2 when at least one
/// failed, 1 on a fatal error.
#[derive(Parser, Debug)]
#[command(name = "bibresolve")]
#[command(author, version, about)]
pub struct Args {
    /// DOIs, DOI URLs or `doi:` references to resolve
    pub inputs: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Extract DOIs from free text instead of reading one input per line
    #[arg(long)]
    pub scan: bool,

    /// Identifiers resolved concurrently (1-100) [default: 4]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Extra attempts for transient failures (0-10) [default: 3]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Requests per second allowed to each source (0 disables throttling)
    #[arg(short = 'l', long, value_parser = clap::value_parser!(u32).range(0..=1000))]
    pub rate: Option<u32>,

    /// Per-request timeout in seconds (1-300) [default: 10]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=300))]
    pub fetch_timeout: Option<u64>,

    /// Overall batch deadline in seconds; unfinished identifiers are reported as cancelled
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// SQLite file for the persistent cache (in-memory when omitted)
    #[arg(long, value_name = "PATH")]
    pub cache_db: Option<PathBuf>,

    /// Memory cache capacity in records [default: 10000]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub l1_capacity: Option<u64>,

    /// Memory cache time-to-live in seconds [default: 3600]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub l1_ttl: Option<u64>,

    /// Persistent cache time-to-live in seconds [default: 86400]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub l2_ttl: Option<u64>,

    /// Citation key pattern: author_year, author_title_year or journal_year
    #[arg(short = 'k', long)]
    pub key_pattern: Option<KeyPattern>,

    /// Contact address sent to Crossref and DataCite
    #[arg(long)]
    pub mailto: Option<String>,

    /// Sources to try, in order (crossref, datacite, doi.org)
    #[arg(short = 's', long, value_delimiter = ',')]
    pub sources: Vec<String>,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH", conflicts_with = "no_config")]
    pub config: Option<PathBuf>,

    /// Ignore the config file
    #[arg(long)]
    pub no_config: bool,

    /// Print the report on a single line
    #[arg(long)]
    pub compact: bool,
}

impl Args {
    /// Merges command-line values over `file` values over built-in defaults.
    pub fn engine_config(&self, file: &FileConfig) -> Result<EngineConfig> {
        let mut config = EngineConfig::default();

        let source_names = if self.sources.is_empty() {
            file.sources.clone().unwrap_or_default()
        } else {
            self.sources.clone()
        };
        if !source_names.is_empty() {
            config.sources = builtin_sources(&source_names)?;
        }
        if let Some(rate) = self.rate.or(file.rate) {
            config.sources = config
                .sources
                .into_iter()
                .map(|source| source.with_rate(rate, Duration::from_secs(1)))
                .collect();
        }

        if let Some(retries) = self.max_retries.or(file.max_retries) {
            config.pool.max_retries = u32::from(retries);
        }
        if let Some(secs) = self.fetch_timeout.or(file.fetch_timeout_secs) {
            config.pool.fetch_timeout = Duration::from_secs(secs);
        }

        config.cache.l1_capacity = match self.l1_capacity.or(file.l1_capacity) {
            Some(capacity) => usize::try_from(capacity)?,
            None => DEFAULT_L1_CAPACITY,
        };
        config.cache.l1_ttl = self
            .l1_ttl
            .or(file.l1_ttl_secs)
            .map_or(DEFAULT_L1_TTL, Duration::from_secs);
        config.cache.l2_ttl = self
            .l2_ttl
            .or(file.l2_ttl_secs)
            .map_or(DEFAULT_L2_TTL, Duration::from_secs);
        config.cache.database = self.cache_db.clone().or_else(|| file.cache_db.clone());

        config.batch.concurrency = self
            .concurrency
            .or(file.concurrency)
            .map_or(DEFAULT_CONCURRENCY, usize::from);
        config.batch.timeout = self
            .timeout
            .or(file.batch_timeout_secs)
            .map(Duration::from_secs);
        if let Some(pattern) = self.key_pattern.or(file.key_pattern) {
            config.batch.key_pattern = pattern;
        }

        config.mailto = self.mailto.clone().or_else(|| file.mailto.clone());
        Ok(config)
    }
}

fn builtin_sources(names: &[String]) -> Result<Vec<SourceConfig>> {
    names
        .iter()
        .map(|name| {
            let name = name.trim();
            match SourceConfig::builtin(name) {
                Some(source) => Ok(source),
                None => bail!("Unknown source '{name}'\n  Suggestion: use crossref, datacite or doi.org"),
            }
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["bibresolve"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.inputs.is_empty());
        assert!(args.concurrency.is_none());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["bibresolve", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_positional_inputs() {
        let args = Args::try_parse_from(["bibresolve", "10.1234/a", "doi:10.1234/b"]).unwrap();
        assert_eq!(args.inputs, vec!["10.1234/a", "doi:10.1234/b"]);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["bibresolve", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    // ==================== Range Tests ====================

    #[test]
    fn test_cli_concurrency_bounds() {
        assert_eq!(
            Args::try_parse_from(["bibresolve", "-c", "100"]).unwrap().concurrency,
            Some(100)
        );
        for bad in ["0", "101"] {
            let err = Args::try_parse_from(["bibresolve", "-c", bad]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_max_retries_bounds() {
        assert_eq!(
            Args::try_parse_from(["bibresolve", "-r", "0"]).unwrap().max_retries,
            Some(0)
        );
        let err = Args::try_parse_from(["bibresolve", "-r", "11"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_key_pattern_parses() {
        let args = Args::try_parse_from(["bibresolve", "-k", "journal-year"]).unwrap();
        assert_eq!(args.key_pattern, Some(KeyPattern::JournalYear));
        assert!(Args::try_parse_from(["bibresolve", "-k", "title"]).is_err());
    }

    #[test]
    fn test_cli_config_conflicts_with_no_config() {
        let err = Args::try_parse_from(["bibresolve", "--config", "x.toml", "--no-config"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    // ==================== Merge Tests ====================

    #[test]
    fn test_engine_config_defaults() {
        let args = Args::try_parse_from(["bibresolve"]).unwrap();
        let config = args.engine_config(&FileConfig::default()).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_cli_overrides_file() {
        let args = Args::try_parse_from(["bibresolve", "-c", "8", "--sources", "datacite,crossref"]).unwrap();
        let file = FileConfig {
            concurrency: Some(2),
            max_retries: Some(1),
            mailto: Some("me@example.org".to_string()),
            ..FileConfig::default()
        };
        let config = args.engine_config(&file).unwrap();
        assert_eq!(config.batch.concurrency, 8);
        assert_eq!(config.pool.max_retries, 1);
        assert_eq!(config.mailto.as_deref(), Some("me@example.org"));
        let names: Vec<_> = config.sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["datacite", "crossref"]);
    }

    #[test]
    fn test_engine_config_rate_applies_to_every_source() {
        let args = Args::try_parse_from(["bibresolve", "--rate", "2"]).unwrap();
        let config = args.engine_config(&FileConfig::default()).unwrap();
        assert!(config.sources.iter().all(|s| s.rate == 2));
    }

    #[test]
    fn test_engine_config_rejects_unknown_source() {
        let args = Args::try_parse_from(["bibresolve", "-s", "pubmed"]).unwrap();
        let err = args.engine_config(&FileConfig::default()).unwrap_err();
        assert!(err.to_string().contains("pubmed"));
    }
}
