use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Root for the local blob store.
    pub storage_dir: String,
    pub database_url: String,
    /// When set, documents live in this S3 bucket instead of `storage_dir`.
    pub s3_bucket: Option<String>,
    /// Base URL used to build viewer links.
    pub public_url: String,
    pub token_ttl: Duration,
    pub single_use_tokens: bool,
    /// Batch jobs admitted per API key per rolling minute.
    pub batch_quota: u32,
    /// Optional `frame-ancestors` sources for the delivery CSP header.
    pub frame_ancestors: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            storage_dir: "./data/blobs".into(),
            database_url: "sqlite://./data/meta/docgate.db".into(),
            s3_bucket: None,
            public_url: "http://localhost:3000".into(),
            token_ttl: Duration::from_secs(600),
            single_use_tokens: false,
            batch_quota: 60,
            frame_ancestors: None,
        }
    }
}

/// What the binary should do after loading configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Serve,
    Migrate,
    IssueApiKey { owner_id: String },
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Gated view-only document delivery")]
pub struct Args {
    /// Host to bind to (overrides DOCGATE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DOCGATE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for the local blob store (overrides DOCGATE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides DOCGATE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// S3 bucket for durable storage (overrides DOCGATE_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Public base URL for viewer links (overrides DOCGATE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Access token lifetime in seconds (overrides DOCGATE_TOKEN_TTL_SECS)
    #[arg(long)]
    pub token_ttl_secs: Option<u64>,

    /// Consume tokens on first use (overrides DOCGATE_SINGLE_USE_TOKENS)
    #[arg(long)]
    pub single_use_tokens: bool,

    /// Batch jobs per API key per minute (overrides DOCGATE_BATCH_QUOTA)
    #[arg(long)]
    pub batch_quota: Option<u32>,

    /// CSP frame-ancestors sources (overrides DOCGATE_FRAME_ANCESTORS)
    #[arg(long)]
    pub frame_ancestors: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Issue an ingestion API key for OWNER, print it and exit
    #[arg(long, value_name = "OWNER")]
    pub issue_api_key: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        Self::merge(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge CLI args over environment lookups over defaults.
    pub fn merge(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, Command)> {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let env_port = parse_env(&lookup, "DOCGATE_PORT")?;
        let env_ttl: Option<u64> = parse_env(&lookup, "DOCGATE_TOKEN_TTL_SECS")?;
        let env_quota = parse_env(&lookup, "DOCGATE_BATCH_QUOTA")?;
        let env_single_use = match lookup("DOCGATE_SINGLE_USE_TOKENS") {
            Some(value) => parse_bool(&value)
                .with_context(|| format!("parsing DOCGATE_SINGLE_USE_TOKENS value `{}`", value))?,
            None => defaults.single_use_tokens,
        };

        let cfg = Self {
            host: args
                .host
                .or_else(|| non_empty("DOCGATE_HOST"))
                .unwrap_or(defaults.host),
            port: args.port.or(env_port).unwrap_or(defaults.port),
            storage_dir: args
                .storage_dir
                .or_else(|| non_empty("DOCGATE_STORAGE_DIR"))
                .unwrap_or(defaults.storage_dir),
            database_url: args
                .database_url
                .or_else(|| non_empty("DOCGATE_DATABASE_URL"))
                .unwrap_or(defaults.database_url),
            s3_bucket: args.s3_bucket.or_else(|| non_empty("DOCGATE_S3_BUCKET")),
            public_url: args
                .public_url
                .or_else(|| non_empty("DOCGATE_PUBLIC_URL"))
                .unwrap_or(defaults.public_url),
            token_ttl: args
                .token_ttl_secs
                .or(env_ttl)
                .map(Duration::from_secs)
                .unwrap_or(defaults.token_ttl),
            single_use_tokens: args.single_use_tokens || env_single_use,
            batch_quota: args.batch_quota.or(env_quota).unwrap_or(defaults.batch_quota),
            frame_ancestors: args
                .frame_ancestors
                .or_else(|| non_empty("DOCGATE_FRAME_ANCESTORS")),
        };

        if cfg.token_ttl.is_zero() {
            bail!("token TTL must be greater than zero");
        }

        let command = match (args.migrate, args.issue_api_key) {
            (true, Some(_)) => bail!("--migrate and --issue-api-key are mutually exclusive"),
            (true, None) => Command::Migrate,
            (false, Some(owner_id)) => Command::IssueApiKey { owner_id },
            (false, None) => Command::Serve,
        };

        Ok((cfg, command))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(None),
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("expected a boolean, got `{}`", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_without_args_or_env() {
        let (cfg, command) = AppConfig::merge(Args::default(), env_of(&[])).unwrap();
        assert_eq!(command, Command::Serve);
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.token_ttl, Duration::from_secs(600));
        assert_eq!(cfg.batch_quota, 60);
        assert!(cfg.s3_bucket.is_none());
        assert!(!cfg.single_use_tokens);
    }

    #[test]
    fn args_override_env() {
        let args = Args {
            port: Some(9000),
            ..Args::default()
        };
        let env = env_of(&[
            ("DOCGATE_PORT", "8000"),
            ("DOCGATE_HOST", "127.0.0.1"),
            ("DOCGATE_S3_BUCKET", "docs-prod"),
            ("DOCGATE_SINGLE_USE_TOKENS", "true"),
            ("DOCGATE_TOKEN_TTL_SECS", "120"),
        ]);
        let (cfg, _) = AppConfig::merge(args, env).unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.s3_bucket.as_deref(), Some("docs-prod"));
        assert!(cfg.single_use_tokens);
        assert_eq!(cfg.token_ttl, Duration::from_secs(120));
    }

    #[test]
    fn malformed_env_values_are_errors() {
        assert!(AppConfig::merge(Args::default(), env_of(&[("DOCGATE_PORT", "eighty")])).is_err());
        assert!(
            AppConfig::merge(Args::default(), env_of(&[("DOCGATE_SINGLE_USE_TOKENS", "maybe")]))
                .is_err()
        );
        assert!(AppConfig::merge(Args::default(), env_of(&[("DOCGATE_TOKEN_TTL_SECS", "0")])).is_err());
    }

    #[test]
    fn blank_bucket_selects_local_storage() {
        let (cfg, _) = AppConfig::merge(Args::default(), env_of(&[("DOCGATE_S3_BUCKET", " ")])).unwrap();
        assert!(cfg.s3_bucket.is_none());
    }

    #[test]
    fn one_shot_commands() {
        let args = Args {
            issue_api_key: Some("owner-1".into()),
            ..Args::default()
        };
        let (_, command) = AppConfig::merge(args, env_of(&[])).unwrap();
        assert_eq!(
            command,
            Command::IssueApiKey {
                owner_id: "owner-1".into()
            }
        );

        let args = Args {
            migrate: true,
            ..Args::default()
        };
        assert_eq!(AppConfig::merge(args, env_of(&[])).unwrap().1, Command::Migrate);
    }
}
