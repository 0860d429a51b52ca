use std::path::PathBuf;
use std::time::Duration;

use regserver_core::types::{JobKind, ScratchPolicy};

/// Settings for one job kind.
#[derive(Debug, Clone)]
pub struct JobKindConfig {
    /// Maximum number of jobs of this kind running at once.
    pub max_concurrent: usize,
    /// Wall-clock budget per job, measured from request start.
    pub timeout: Duration,
    /// External binary invoked for each job.
    pub program: PathBuf,
    /// What happens to the job directory after responding.
    pub scratch: ScratchPolicy,
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8090`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// Root of all job scratch directories; each kind gets a subdirectory.
    pub jobs_data_location: PathBuf,
    pub registration: JobKindConfig,
    pub transform: JobKindConfig,
    /// How long a pre-registered registration id stays claimable.
    pub queue_ticket_ttl: Option<Duration>,
    /// Upper bound on a whole multipart request body.
    pub max_upload_bytes: usize,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                 |
    /// |-------------------------------|-------------------------|
    /// | `HOST`                        | `0.0.0.0`               |
    /// | `PORT`                        | `8090`                  |
    /// | `CORS_ORIGINS`                | `http://localhost:5173` |
    /// | `JOBS_DATA_LOCATION`          | `./jobs`                |
    /// | `ELASTIX_MAX_CONCURRENT`      | `1`                     |
    /// | `ELASTIX_TIMEOUT_MS`          | `50000`                 |
    /// | `ELASTIX_PATH`                | `elastix`               |
    /// | `ELASTIX_RETAIN_SCRATCH`      | `true`                  |
    /// | `TRANSFORMIX_MAX_CONCURRENT`  | `8`                     |
    /// | `TRANSFORMIX_TIMEOUT_MS`      | `50000`                 |
    /// | `TRANSFORMIX_PATH`            | `transformix`           |
    /// | `TRANSFORMIX_RETAIN_SCRATCH`  | `false`                 |
    /// | `QUEUE_TICKET_TTL_SECS`       | `600` (`0` disables)    |
    /// | `MAX_UPLOAD_BYTES`            | `1073741824`            |
    /// | `SHUTDOWN_TIMEOUT_SECS`       | `30`                    |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = parse_env("PORT", 8090);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let jobs_data_location = std::env::var("JOBS_DATA_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./jobs"));

        let registration = JobKindConfig::from_env("ELASTIX", "elastix", 1, true);
        let transform = JobKindConfig::from_env("TRANSFORMIX", "transformix", 8, false);

        let ttl_secs: u64 = parse_env("QUEUE_TICKET_TTL_SECS", 600);
        let queue_ticket_ttl = (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs));

        Self {
            host,
            port,
            cors_origins,
            jobs_data_location,
            registration,
            transform,
            queue_ticket_ttl,
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", 1024 * 1024 * 1024),
            shutdown_timeout_secs: parse_env("SHUTDOWN_TIMEOUT_SECS", 30),
        }
    }

    /// Scratch root of `kind`, e.g. `<jobs_data_location>/elastix`.
    pub fn kind_root(&self, kind: JobKind) -> PathBuf {
        self.jobs_data_location.join(kind.dir_name())
    }

    pub fn kind(&self, kind: JobKind) -> &JobKindConfig {
        match kind {
            JobKind::Registration => &self.registration,
            JobKind::Transform => &self.transform,
        }
    }
}

impl JobKindConfig {
    fn from_env(prefix: &str, default_program: &str, default_max: usize, retain: bool) -> Self {
        let program = std::env::var(format!("{prefix}_PATH"))
            .unwrap_or_else(|_| default_program.into())
            .into();
        let retain: bool = parse_env(&format!("{prefix}_RETAIN_SCRATCH"), retain);

        Self {
            max_concurrent: parse_env(&format!("{prefix}_MAX_CONCURRENT"), default_max),
            timeout: Duration::from_millis(parse_env(&format!("{prefix}_TIMEOUT_MS"), 50_000)),
            program,
            scratch: if retain {
                ScratchPolicy::Retain
            } else {
                ScratchPolicy::Erase
            },
        }
    }
}

/// Read `key` and parse it, falling back to `default` when unset.
///
/// Panics on a value that does not parse: misconfiguration should fail at startup.
fn parse_env<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} must be a valid value: {e}")),
        Err(_) => default,
    }
}
