// Runner configuration from CHUNKLINE_* environment variables

use anyhow::{bail, Context, Result};
use chunkline_core::application::constants::{DEFAULT_COMMIT_INTERVAL, DEFAULT_SKIP_LIMIT};

const DEFAULT_DB_PATH: &str = "~/.chunkline/batch.db";
const DEFAULT_JOB_NAME: &str = "line-copy";

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub db_path: String,
    pub input: String,
    pub output: String,
    pub job_name: String,
    pub commit_interval: usize,
    pub skip_limit: i64,
    /// Extra identifying parameter so the same files can be processed again
    pub run_id: Option<String>,
}

impl RunnerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the process environment in production)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = |key: &str| lookup(key).map(|p| shellexpand::tilde(&p).into_owned());

        let input = match path("CHUNKLINE_INPUT") {
            Some(input) => input,
            None => bail!("CHUNKLINE_INPUT must name the input file"),
        };
        let output = match path("CHUNKLINE_OUTPUT") {
            Some(output) => output,
            None => bail!("CHUNKLINE_OUTPUT must name the output file"),
        };

        let commit_interval = match lookup("CHUNKLINE_COMMIT_INTERVAL") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("CHUNKLINE_COMMIT_INTERVAL={} is not a count", raw))?,
            None => DEFAULT_COMMIT_INTERVAL,
        };
        if commit_interval == 0 {
            bail!("CHUNKLINE_COMMIT_INTERVAL must be at least 1");
        }

        let skip_limit = match lookup("CHUNKLINE_SKIP_LIMIT") {
            Some(raw) => raw
                .parse::<i64>()
                .with_context(|| format!("CHUNKLINE_SKIP_LIMIT={} is not a number", raw))?,
            None => DEFAULT_SKIP_LIMIT,
        };

        Ok(Self {
            db_path: path("CHUNKLINE_DB_PATH")
                .unwrap_or_else(|| shellexpand::tilde(DEFAULT_DB_PATH).into_owned()),
            input,
            output,
            job_name: lookup("CHUNKLINE_JOB_NAME").unwrap_or_else(|| DEFAULT_JOB_NAME.to_string()),
            commit_interval,
            skip_limit,
            run_id: lookup("CHUNKLINE_RUN_ID"),
        })
    }

    /// sqlx connection url for `db_path`
    pub fn database_url(&self) -> String {
        if self.db_path.starts_with("sqlite:") {
            self.db_path.clone()
        } else {
            format!("sqlite://{}", self.db_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::from_lookup(lookup(&[
            ("CHUNKLINE_INPUT", "/data/in.txt"),
            ("CHUNKLINE_OUTPUT", "/data/out.txt"),
            ("CHUNKLINE_DB_PATH", "/data/batch.db"),
        ]))
        .unwrap();
        assert_eq!(config.job_name, "line-copy");
        assert_eq!(config.commit_interval, DEFAULT_COMMIT_INTERVAL);
        assert_eq!(config.skip_limit, DEFAULT_SKIP_LIMIT);
        assert_eq!(config.database_url(), "sqlite:///data/batch.db");
        assert_eq!(config.run_id, None);
    }

    #[test]
    fn test_requires_input_and_output() {
        assert!(RunnerConfig::from_lookup(lookup(&[("CHUNKLINE_OUTPUT", "o")])).is_err());
        assert!(RunnerConfig::from_lookup(lookup(&[("CHUNKLINE_INPUT", "i")])).is_err());
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let base = [("CHUNKLINE_INPUT", "i"), ("CHUNKLINE_OUTPUT", "o")];
        let mut zero = base.to_vec();
        zero.push(("CHUNKLINE_COMMIT_INTERVAL", "0"));
        assert!(RunnerConfig::from_lookup(lookup(&zero)).is_err());

        let mut garbage = base.to_vec();
        garbage.push(("CHUNKLINE_SKIP_LIMIT", "lots"));
        assert!(RunnerConfig::from_lookup(lookup(&garbage)).is_err());
    }
}
