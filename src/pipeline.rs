//! Stage graph: stream → extract → resolve → { temperature file, average → average file }.
//!
//! Every stage runs as its own task in one [`TaskGroup`] and talks to its
//! neighbours only through rendezvous channels. A stage checks the shared
//! cancellation token at each suspension point and returns `Ok(())` when it
//! fires, dropping its channel ends and clients on the way out.


use crate::average::SlidingAverage;
use crate::channel::{rendezvous, StageReceiver, StageSender};
use crate::error::{FetchError, PipelineError};
use crate::extract::extract_location;
use crate::record::{AverageReading, Located, TemperatureReading};
use crate::retry::RetryPolicy;
use crate::sink::RecordSink;
use crate::task_group::TaskGroup;
use crate::twitter::{LineStream, StreamConnector};
use crate::weather::TemperatureLookup;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub lines_received: AtomicU64,
    pub records_skipped: AtomicU64,
    pub locations_extracted: AtomicU64,
    pub lookups_skipped: AtomicU64,
    pub readings_rejected: AtomicU64,
    pub temperatures_resolved: AtomicU64,
    pub averages_computed: AtomicU64,
    pub temperatures_written: AtomicU64,
    pub averages_written: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub lines_received: u64,
    pub records_skipped: u64,
    pub locations_extracted: u64,
    pub lookups_skipped: u64,
    pub readings_rejected: u64,
    pub temperatures_resolved: u64,
    pub averages_computed: u64,
    pub temperatures_written: u64,
    pub averages_written: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineReport {
        PipelineReport {
            lines_received: self.lines_received.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            locations_extracted: self.locations_extracted.load(Ordering::Relaxed),
            lookups_skipped: self.lookups_skipped.load(Ordering::Relaxed),
            readings_rejected: self.readings_rejected.load(Ordering::Relaxed),
            temperatures_resolved: self.temperatures_resolved.load(Ordering::Relaxed),
            averages_computed: self.averages_computed.load(Ordering::Relaxed),
            temperatures_written: self.temperatures_written.load(Ordering::Relaxed),
            averages_written: self.averages_written.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub struct Pipeline<C, L> {
    connector: C,
    lookup: L,
    window: SlidingAverage,
    stream_retry: RetryPolicy,
    lookup_retry: RetryPolicy,
}

impl<C, L> Pipeline<C, L>
where
    C: StreamConnector + 'static,
    L: TemperatureLookup + 'static,
{
    pub fn new(connector: C, lookup: L, window: SlidingAverage) -> Self {
        Self {
            connector,
            lookup,
            window,
            stream_retry: RetryPolicy::default(),
            lookup_retry: RetryPolicy::default(),
        }
    }

    pub fn stream_retry(mut self, policy: RetryPolicy) -> Self {
        self.stream_retry = policy;
        self
    }

    pub fn lookup_retry(mut self, policy: RetryPolicy) -> Self {
        self.lookup_retry = policy;
        self
    }

    /// Runs until the stream ends, `cancel` fires, or a stage fails. By the
    /// time this returns every stage has exited and both sinks are closed.
    pub async fn run<W1, W2>(
        self,
        temperature_sink: RecordSink<W1>,
        average_sink: RecordSink<W2>,
        cancel: CancellationToken,
    ) -> Result<PipelineReport, PipelineError>
    where
        W1: AsyncWrite + Unpin + Send + 'static,
        W2: AsyncWrite + Unpin + Send + 'static,
    {
        let stats = Arc::new(PipelineStats::default());
        let mut group = TaskGroup::new(cancel);

        let (send_line, receive_line) = rendezvous::<String>("line");
        let (send_location, receive_location) = rendezvous::<Located>("location");
        let (send_temperature_to_file, receive_temperature_to_file) =
            rendezvous::<TemperatureReading>("temperature file");
        let (send_temperature_to_average, receive_temperature_to_average) =
            rendezvous::<TemperatureReading>("temperature average");
        let (send_average, receive_average) = rendezvous::<AverageReading>("average file");

        group.spawn(
            "stream",
            observe_stream(
                self.connector,
                self.stream_retry,
                send_line,
                stats.clone(),
                group.token(),
            ),
        );
        group.spawn(
            "extract",
            extract_locations(receive_line, send_location, stats.clone(), group.token()),
        );
        group.spawn(
            "resolve",
            resolve_temperatures(
                self.lookup,
                self.lookup_retry,
                receive_location,
                send_temperature_to_file,
                send_temperature_to_average,
                stats.clone(),
                group.token(),
            ),
        );
        group.spawn(
            "temperature sink",
            write_records(
                receive_temperature_to_file,
                temperature_sink,
                WrittenCounter::Temperatures(stats.clone()),
                group.token(),
            ),
        );
        group.spawn(
            "average",
            compute_sliding_average(
                self.window,
                receive_temperature_to_average,
                send_average,
                stats.clone(),
                group.token(),
            ),
        );
        group.spawn(
            "average sink",
            write_records(
                receive_average,
                average_sink,
                WrittenCounter::Averages(stats.clone()),
                group.token(),
            ),
        );

        let outcome = group.join().await;
        let report = stats.snapshot();
        tracing::info!(?report, "pipeline stopped");
        outcome.map(|()| report)
    }
}

/// `None` when `cancel` fires first.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

async fn observe_stream<C: StreamConnector>(
    connector: C,
    policy: RetryPolicy,
    send_line: StageSender<String>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) -> Result<(), PipelineError> {
    let result = stream_lines(&connector, policy, &send_line, &stats, &cancel).await;
    drop(connector);
    tracing::debug!("stream client closed");
    result
}

async fn stream_lines<C: StreamConnector>(
    connector: &C,
    policy: RetryPolicy,
    send_line: &StageSender<String>,
    stats: &PipelineStats,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    // One budget covers failed connects and sessions that break before
    // delivering anything; only a productive session starts it over.
    let mut attempts = policy.attempts("stream connect");
    loop {
        let Some(connected) = until_cancelled(cancel, connector.connect()).await else {
            return Ok(());
        };
        let failure = match connected {
            Ok(mut session) => match read_session(&mut *session, send_line, stats, cancel).await? {
                SessionEnd::Finished => return Ok(()),
                SessionEnd::Broken { delivered, error } => {
                    if delivered > 0 {
                        attempts.reset();
                    }
                    tracing::warn!(error = %error, delivered, "stream interrupted; reconnecting");
                    error
                }
            },
            Err(err) => err,
        };
        let delay = attempts.record_failure(failure)?;
        if until_cancelled(cancel, tokio::time::sleep(delay)).await.is_none() {
            return Ok(());
        }
    }
}

enum SessionEnd {
    /// The feed ended or the pipeline was cancelled.
    Finished,
    Broken { delivered: u64, error: FetchError },
}

async fn read_session(
    session: &mut dyn LineStream,
    send_line: &StageSender<String>,
    stats: &PipelineStats,
    cancel: &CancellationToken,
) -> Result<SessionEnd, PipelineError> {
    let mut delivered = 0u64;
    loop {
        let Some(next) = until_cancelled(cancel, session.next_line()).await else {
            return Ok(SessionEnd::Finished);
        };
        match next {
            Ok(Some(line)) => {
                bump(&stats.lines_received);
                tracing::debug!(line = %line, "received");
                let Some(sent) = until_cancelled(cancel, send_line.send(line)).await else {
                    return Ok(SessionEnd::Finished);
                };
                sent?;
                delivered += 1;
            }
            Ok(None) => {
                tracing::info!("stream ended");
                return Ok(SessionEnd::Finished);
            }
            Err(error) => return Ok(SessionEnd::Broken { delivered, error }),
        }
    }
}

async fn extract_locations(
    receive_line: StageReceiver<String>,
    send_location: StageSender<Located>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) -> Result<(), PipelineError> {
    while let Some(Some(line)) = until_cancelled(&cancel, receive_line.recv()).await {
        let Some(located) = extract_location(&line) else {
            bump(&stats.records_skipped);
            continue;
        };
        bump(&stats.locations_extracted);
        let Some(sent) = until_cancelled(&cancel, send_location.send(located)).await else {
            break;
        };
        sent?;
    }
    Ok(())
}

async fn resolve_temperatures<L: TemperatureLookup>(
    lookup: L,
    policy: RetryPolicy,
    receive_location: StageReceiver<Located>,
    send_to_file: StageSender<TemperatureReading>,
    send_to_average: StageSender<TemperatureReading>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) -> Result<(), PipelineError> {
    let result = resolve_each(
        &lookup,
        policy,
        &receive_location,
        [&send_to_file, &send_to_average],
        &stats,
        &cancel,
    )
    .await;
    drop(lookup);
    tracing::debug!("weather client closed");
    result
}

async fn resolve_each<L: TemperatureLookup>(
    lookup: &L,
    policy: RetryPolicy,
    receive_location: &StageReceiver<Located>,
    consumers: [&StageSender<TemperatureReading>; 2],
    stats: &PipelineStats,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    while let Some(Some(located)) = until_cancelled(cancel, receive_location.recv()).await {
        let coordinate = located.value;
        let lookup_call = policy.run("weather lookup", move || lookup.current_temperature(coordinate));
        let Some(found) = until_cancelled(cancel, lookup_call).await else {
            break;
        };
        let Some(temperature) = found? else {
            bump(&stats.lookups_skipped);
            tracing::info!(%coordinate, "unable to get weather; skipping");
            continue;
        };
        // Rejected before the fan-out so both outputs keep the same records.
        if !SlidingAverage::accepts(temperature) {
            bump(&stats.readings_rejected);
            tracing::info!(%temperature, %coordinate, "temperature out of range; skipping");
            continue;
        }

        bump(&stats.temperatures_resolved);
        tracing::info!(%temperature, %coordinate, "found temperature");
        let reading = located.with_value(temperature);
        // Both consumers get every reading, always file first then average.
        for consumer in consumers {
            let Some(sent) = until_cancelled(cancel, consumer.send(reading)).await else {
                return Ok(());
            };
            sent?;
        }
    }
    Ok(())
}

async fn compute_sliding_average(
    mut window: SlidingAverage,
    receive_temperature: StageReceiver<TemperatureReading>,
    send_average: StageSender<AverageReading>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
) -> Result<(), PipelineError> {
    while let Some(Some(reading)) = until_cancelled(&cancel, receive_temperature.recv()).await {
        let Some(average) = window.push(reading.value) else {
            return Err(PipelineError::StageFailed {
                stage: "average",
                message: format!("running sum overflowed adding {}", reading.value),
            });
        };
        bump(&stats.averages_computed);
        tracing::debug!(%average, samples = window.len(), "updated sliding average");
        let averaged = reading.with_value(average);
        let Some(sent) = until_cancelled(&cancel, send_average.send(averaged)).await else {
            break;
        };
        sent?;
    }
    Ok(())
}

enum WrittenCounter {
    Temperatures(Arc<PipelineStats>),
    Averages(Arc<PipelineStats>),
}

impl WrittenCounter {
    fn bump(&self) {
        match self {
            Self::Temperatures(stats) => bump(&stats.temperatures_written),
            Self::Averages(stats) => bump(&stats.averages_written),
        }
    }
}

async fn write_records<W: AsyncWrite + Unpin>(
    receive: StageReceiver<TemperatureReading>,
    mut sink: RecordSink<W>,
    counter: WrittenCounter,
    cancel: CancellationToken,
) -> Result<(), PipelineError> {
    let label = sink.label();
    let mut failure = None;
    // Only the wait for the next record is cancellable; a record that has
    // been received is always written out whole.
    while let Some(Some(record)) = until_cancelled(&cancel, receive.recv()).await {
        if let Err(err) = sink.write(&record).await {
            failure = Some(err);
            break;
        }
        counter.bump();
    }
    drop(receive);

    let closed = sink.close().await;
    match (failure, closed) {
        (Some(source), _) | (None, Err(source)) => Err(PipelineError::Sink { sink: label, source }),
        (None, Ok(written)) => {
            tracing::info!(sink = label, written, "output closed");
            Ok(())
        }
    }
}
