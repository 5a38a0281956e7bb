use crate::average::{MAX_WINDOW, MIN_WINDOW};
use crate::cli::Args;
use crate::retry::RetryPolicy;
use crate::weather::TemperatureUnit;
use anyhow::{bail, ensure, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Clone)]
pub struct Config {
    pub window_size: usize,
    pub temperature_file: PathBuf,
    pub average_file: PathBuf,
    pub verbosity: u8,
    pub twitter_token: String,
    pub weather_api_key: String,
    pub stream_url: String,
    pub weather_url: String,
    pub unit: TemperatureUnit,
    pub retry_attempts: u32,
    pub retry_min_backoff_secs: u64,
    pub retry_max_backoff_secs: u64,
    pub request_timeout_secs: u64,
}

// Credentials stay out of logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("window_size", &self.window_size)
            .field("temperature_file", &self.temperature_file)
            .field("average_file", &self.average_file)
            .field("verbosity", &self.verbosity)
            .field("stream_url", &self.stream_url)
            .field("weather_url", &self.weather_url)
            .field("unit", &self.unit)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_min_backoff_secs", &self.retry_min_backoff_secs)
            .field("retry_max_backoff_secs", &self.retry_max_backoff_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        ensure!(
            (MIN_WINDOW..=MAX_WINDOW).contains(&args.window_size),
            "--window-size must be between {MIN_WINDOW} and {MAX_WINDOW}, got {}",
            args.window_size
        );
        let twitter_token = required_secret(args.twitter_token, "--twitter-token / TWITTER_BEARER_TOKEN")?;
        let weather_api_key = required_secret(args.weather_api_key, "--weather-api-key / WEATHER_API_KEY")?;
        let stream_url = base_url(&args.stream_url).context("invalid --stream-url")?;
        let weather_url = base_url(&args.weather_url).context("invalid --weather-url")?;

        ensure!(args.retry_attempts >= 1, "--retry-attempts must be at least 1");
        ensure!(
            args.retry_min_backoff_secs <= args.retry_max_backoff_secs,
            "--retry-min-backoff-secs ({}) exceeds --retry-max-backoff-secs ({})",
            args.retry_min_backoff_secs,
            args.retry_max_backoff_secs
        );
        ensure!(args.request_timeout_secs > 0, "--request-timeout-secs must be positive");

        Ok(Self {
            window_size: args.window_size,
            temperature_file: args.temperature_file,
            average_file: args.average_file,
            verbosity: args.verbose,
            twitter_token,
            weather_api_key,
            stream_url,
            weather_url,
            unit: args.unit,
            retry_attempts: args.retry_attempts,
            retry_min_backoff_secs: args.retry_min_backoff_secs,
            retry_max_backoff_secs: args.retry_max_backoff_secs,
            request_timeout_secs: args.request_timeout_secs,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.retry_min_backoff_secs),
            Duration::from_secs(self.retry_max_backoff_secs),
            self.retry_attempts,
        )
    }
}

fn required_secret(value: String, name: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("{name} is required");
    }
    Ok(trimmed.to_string())
}

/// An absolute http(s) URL, returned without a trailing slash.
fn base_url(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw.trim()).with_context(|| format!("`{raw}` is not a URL"))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => bail!("unsupported scheme `{other}`"),
    }
    ensure!(parsed.host_str().is_some(), "`{raw}` has no host");
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}
