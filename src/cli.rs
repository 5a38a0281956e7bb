use crate::average::{MAX_WINDOW, MIN_WINDOW};
use crate::weather::TemperatureUnit;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tweettemp",
    version,
    about = "Record the current temperature where sampled tweets were posted, plus a sliding average"
)]
pub struct Args {
    /// Calculate the sliding average over the last N tweets.
    #[arg(long, value_name = "N", default_value_t = 5, value_parser = window_size)]
    pub window_size: usize,
    /// Output momentary temperature data to this file.
    #[arg(long, value_name = "FILE")]
    pub temperature_file: PathBuf,
    /// Output average temperature data to this file.
    #[arg(long, value_name = "FILE")]
    pub average_file: PathBuf,
    /// Show verbose output; repeat for more.
    #[arg(short, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Twitter API app-only authentication token.
    #[arg(long, value_name = "TOKEN", env = "TWITTER_BEARER_TOKEN", hide_env_values = true)]
    pub twitter_token: String,
    /// weatherapi.com API key.
    #[arg(long, value_name = "APIKEY", env = "WEATHER_API_KEY", hide_env_values = true)]
    pub weather_api_key: String,
    #[arg(long, value_name = "URL", default_value = "https://api.twitter.com")]
    pub stream_url: String,
    #[arg(long, value_name = "URL", default_value = "http://api.weatherapi.com")]
    pub weather_url: String,
    #[arg(long, value_enum, default_value_t = TemperatureUnit::Fahrenheit)]
    pub unit: TemperatureUnit,
    #[arg(long, default_value_t = 5)]
    pub retry_attempts: u32,
    #[arg(long, default_value_t = 1)]
    pub retry_min_backoff_secs: u64,
    #[arg(long, default_value_t = 10)]
    pub retry_max_backoff_secs: u64,
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,
}

fn window_size(raw: &str) -> Result<usize, String> {
    let size: usize = raw.parse().map_err(|_| format!("`{raw}` is not a number"))?;
    if (MIN_WINDOW..=MAX_WINDOW).contains(&size) {
        Ok(size)
    } else {
        Err(format!("must be between {MIN_WINDOW} and {MAX_WINDOW}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 9] = [
        "tweettemp",
        "--temperature-file",
        "temps.csv",
        "--average-file",
        "avgs.csv",
        "--twitter-token",
        "token",
        "--weather-api-key",
        "key",
    ];

    #[test]
    fn defaults_apply() {
        let args = Args::try_parse_from(REQUIRED).unwrap();
        assert_eq!(args.window_size, 5);
        assert_eq!(args.verbose, 0);
        assert_eq!(args.unit, TemperatureUnit::Fahrenheit);
        assert_eq!(args.retry_attempts, 5);
        assert_eq!(args.stream_url, "https://api.twitter.com");
    }

    #[test]
    fn window_size_is_bounded() {
        for (raw, ok) in [("1", false), ("2", true), ("100", true), ("101", false), ("five", false)] {
            let mut argv = REQUIRED.to_vec();
            argv.extend(["--window-size", raw]);
            assert_eq!(Args::try_parse_from(argv).is_ok(), ok, "window size {raw}");
        }
    }

    #[test]
    fn verbosity_counts_repeats() {
        let mut argv = REQUIRED.to_vec();
        argv.extend(["-vv", "--unit", "celsius"]);
        let args = Args::try_parse_from(argv).unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.unit, TemperatureUnit::Celsius);
    }

    #[test]
    fn output_files_are_required() {
        let argv: Vec<&str> = REQUIRED
            .iter()
            .copied()
            .filter(|arg| !arg.starts_with("--average-file") && *arg != "avgs.csv")
            .collect();
        assert!(Args::try_parse_from(argv).is_err());
    }
}
