use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tweettemp::average::SlidingAverage;
use tweettemp::cli::Args;
use tweettemp::config::Config;
use tweettemp::diagnostics::init_tracing;
use tweettemp::pipeline::Pipeline;
use tweettemp::sink::RecordSink;
use tweettemp::twitter::TwitterClient;
use tweettemp::weather::WeatherClient;

const BANNER: &str = "Data collection may take a few moments to start. Exit with Ctrl+C.";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_args(Args::parse())?;
    init_tracing(config.verbosity)?;
    tracing::debug!(?config, "loaded configuration");

    let stream = TwitterClient::new(
        &config.twitter_token,
        &config.stream_url,
        config.request_timeout(),
    )?;
    let weather = WeatherClient::new(
        &config.weather_api_key,
        &config.weather_url,
        config.unit,
        config.request_timeout(),
    )?;
    let window = SlidingAverage::new(config.window_size)?;

    let temperature_sink = RecordSink::create("temperature", &config.temperature_file)
        .await
        .with_context(|| format!("failed to open {}", config.temperature_file.display()))?;
    let average_sink = RecordSink::create("average", &config.average_file)
        .await
        .with_context(|| format!("failed to open {}", config.average_file.display()))?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown signal received");
                interrupt.cancel();
            }
            Err(err) => tracing::warn!(error=%err, "failed to listen for shutdown signal"),
        }
    });

    eprintln!("{BANNER}");
    let report = Pipeline::new(stream, weather, window)
        .stream_retry(config.retry_policy())
        .lookup_retry(config.retry_policy())
        .run(temperature_sink, average_sink, cancel)
        .await?;
    tracing::info!(
        lines = report.lines_received,
        temperatures = report.temperatures_written,
        averages = report.averages_written,
        "shut down cleanly"
    );
    Ok(())
}
