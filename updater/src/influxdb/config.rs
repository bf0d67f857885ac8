use super::client::{Client, ClientError, OnboardingRequest};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;

pub const DEFAULT_ORG: &str = "wirelesstags";
pub const DEFAULT_BUCKET: &str = "wirelesstags";
pub const DEFAULT_RETENTION_PERIOD: Duration = Duration::from_secs(24 * 365 * 60 * 60);

const DEFAULT_USERNAME: &str = "admin";
const DEFAULT_PASSWORD: &str = "password1";

const TOKEN_FILE_SUFFIX: &str = ".token";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from {path}: {source}")]
    Load { path: PathBuf, source: io::Error },
    #[error("{path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{path}: \"url\" is missing")]
    MissingUrl { path: PathBuf },
    #[error("invalid influxdb url {url:?}: {source}")]
    InvalidUrl { url: String, source: url::ParseError },
    #[error("could not create influxdb client: {0}")]
    Client(#[from] ClientError),
    #[error("token was not configured and setup cannot be performed")]
    NoToken,
}

/// Contents of the JSON config file. Empty strings and a zero retention
/// period count as unset.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfigFile {
    pub url: String,
    /// Only used to set up a fresh database when no token is available.
    pub username: String,
    /// Only used to set up a fresh database when no token is available.
    pub password: String,
    /// If empty, loaded from `<config>.token` or obtained by setting up the database.
    pub token: String,
    pub org: String,
    pub bucket: String,
    /// Nanoseconds.
    pub retention_period: u64,
}

impl ConfigFile {
    /// Reads the file and applies defaults. Does not look for a token.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Load {
            path: path.to_owned(),
            source,
        })?;
        let mut cfg: ConfigFile =
            serde_json::from_reader(io::BufReader::new(file)).map_err(|source| {
                ConfigError::Parse {
                    path: path.to_owned(),
                    source,
                }
            })?;

        if cfg.org.is_empty() {
            cfg.org = DEFAULT_ORG.into();
        }
        if cfg.bucket.is_empty() {
            cfg.bucket = DEFAULT_BUCKET.into();
        }
        if cfg.retention_period == 0 {
            cfg.retention_period = DEFAULT_RETENTION_PERIOD.as_nanos() as u64;
        }

        if cfg.url.is_empty() {
            return Err(ConfigError::MissingUrl {
                path: path.to_owned(),
            });
        }
        validate_url(&cfg.url)?;

        Ok(cfg)
    }

    pub fn retention_period(&self) -> Duration {
        Duration::from_nanos(self.retention_period)
    }

    fn onboarding_request(&self) -> OnboardingRequest {
        let or_default = |value: &str, default: &str| {
            if value.is_empty() {
                default.to_string()
            } else {
                value.to_string()
            }
        };

        OnboardingRequest {
            username: or_default(&self.username, DEFAULT_USERNAME),
            password: or_default(&self.password, DEFAULT_PASSWORD),
            org: self.org.clone(),
            bucket: self.bucket.clone(),
            retention_period_seconds: self.retention_period().as_secs(),
        }
    }
}

/// How often and how patiently to attempt the initial database setup.
#[derive(Clone, Debug, PartialEq)]
pub struct SetupRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for SetupRetry {
    fn default() -> Self {
        // A freshly started database takes a few seconds to accept requests.
        SetupRetry {
            attempts: 10,
            delay: Duration::from_secs(2),
        }
    }
}

/// Everything the sink needs to write.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

impl Config {
    /// Config given directly, e.g. on the command line. Empty org or bucket
    /// fall back to the defaults.
    pub fn new(url: &str, token: &str, org: &str, bucket: &str) -> Result<Self, ConfigError> {
        validate_url(url)?;
        Ok(Config {
            url: url.to_string(),
            token: token.to_string(),
            org: if org.is_empty() { DEFAULT_ORG } else { org }.to_string(),
            bucket: if bucket.is_empty() { DEFAULT_BUCKET } else { bucket }.to_string(),
        })
    }

    /// Loads the config file and resolves a token: from the file itself,
    /// then from `<path>.token`, then by setting up the database and saving
    /// the token it hands out.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_retry(path, &SetupRetry::default()).await
    }

    pub async fn load_with_retry(path: &Path, retry: &SetupRetry) -> Result<Self, ConfigError> {
        let file = ConfigFile::from_file(path)?;
        let token = resolve_token(path, &file, retry).await?;

        Ok(Config {
            url: file.url,
            token,
            org: file.org,
            bucket: file.bucket,
        })
    }
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    url::Url::parse(url)
        .map(|_| ())
        .map_err(|source| ConfigError::InvalidUrl {
            url: url.to_string(),
            source,
        })
}

pub fn token_file_path(config_path: &Path) -> PathBuf {
    let mut path = config_path.as_os_str().to_owned();
    path.push(TOKEN_FILE_SUFFIX);
    PathBuf::from(path)
}

async fn resolve_token(
    path: &Path,
    file: &ConfigFile,
    retry: &SetupRetry,
) -> Result<String, ConfigError> {
    if !file.token.is_empty() {
        return Ok(file.token.clone());
    }

    let token_path = token_file_path(path);
    if let Some(token) = load_token_file(&token_path) {
        tracing::debug!(path = %token_path.display(), "loaded influxdb token");
        return Ok(token);
    }

    let client = Client::new(&file.url, None)?;
    match setup_and_get_token(&client, &file.onboarding_request(), retry).await {
        Ok(token) => {
            if let Err(e) = create_token_file(&token_path, &token) {
                tracing::warn!(
                    path = %token_path.display(),
                    error = %e,
                    "influxdb setup was successful, but token could not be saved"
                );
            }
            Ok(token)
        }
        Err(e) => {
            tracing::warn!(error = %e, "influxdb setup failed");
            Err(ConfigError::NoToken)
        }
    }
}

fn load_token_file(path: &Path) -> Option<String> {
    let token = fs::read_to_string(path).ok()?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn create_token_file(path: &Path, token: &str) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o400);
    }

    let mut file = options.open(path)?;
    file.write_all(token.as_bytes())?;
    file.sync_all()
}

#[derive(thiserror::Error, Debug)]
enum SetupError {
    #[error(transparent)]
    Request(#[from] ClientError),
    #[error("setup completed successfully, but token was missing")]
    MissingToken,
}

impl SetupError {
    fn is_retryable(&self) -> bool {
        matches!(self, SetupError::Request(_))
    }
}

async fn setup_and_get_token(
    client: &Client,
    request: &OnboardingRequest,
    retry: &SetupRetry,
) -> Result<String, SetupError> {
    for attempt in 1..=retry.attempts {
        match try_setup(client, request).await {
            Ok(token) => return Ok(token),
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    attempt,
                    attempts = retry.attempts,
                    error = %e,
                    "influxdb setup attempt failed"
                );
                sleep(retry.delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    try_setup(client, request).await
}

async fn try_setup(client: &Client, request: &OnboardingRequest) -> Result<String, SetupError> {
    let response = client.setup(request).await?;
    response
        .auth
        .and_then(|auth| auth.token)
        .ok_or(SetupError::MissingToken)
}
