use crate::error::TailError;
use crate::metrics::{LINES_READ_TOTAL, TAILER_RESTARTS_TOTAL};
use crate::monitor::PipelineStats;
use crate::parsers::utils::trim_line_bytes;
use crate::watcher::FileWakeups;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const MAX_RESTART_BACKOFF: Duration = Duration::from_secs(30);

/// One complete line with the newline removed.
pub type RawLine = Vec<u8>;

/// Configuration for the file tailer.
#[derive(Debug, Clone)]
pub struct TailerConfig {
    pub poll_interval: Duration,
    pub max_restarts: u32,
    pub restart_base_delay: Duration,
    pub watch_events: bool,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_restarts: 5,
            restart_base_delay: Duration::from_millis(500),
            watch_events: false,
        }
    }
}

async fn sleep_or_cancel(duration: Duration, cancel_token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel_token.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

/// Follows a single growing file from the position it was opened at.
///
/// The byte offset of everything consumed so far (including a buffered partial line)
/// is tracked so a failed reader can be reopened without skipping or repeating data.
pub struct Tailer {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    offset: u64,
    partial: Vec<u8>,
}

impl Tailer {
    /// Opens `path` and positions the cursor at its current end, skipping existing content.
    pub async fn open_at_end(path: impl AsRef<Path>) -> Result<Self, TailError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).await.map_err(|source| TailError::Open {
            path: path.clone(),
            source,
        })?;
        let offset = file
            .seek(SeekFrom::End(0))
            .await
            .map_err(|source| TailError::Seek {
                path: path.clone(),
                offset: 0,
                source,
            })?;

        Ok(Self {
            path,
            reader: Some(BufReader::new(file)),
            offset,
            partial: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Drops the current handle; the next read reopens the file at the tracked offset.
    pub fn invalidate(&mut self) {
        self.reader = None;
    }

    async fn reopen(&mut self) -> Result<(), TailError> {
        let mut file = File::open(&self.path)
            .await
            .map_err(|source| TailError::Open {
                path: self.path.clone(),
                source,
            })?;
        file.seek(SeekFrom::Start(self.offset))
            .await
            .map_err(|source| TailError::Seek {
                path: self.path.clone(),
                offset: self.offset,
                source,
            })?;
        info!(path = %self.path.display(), offset = self.offset, "reopened log file");
        self.reader = Some(BufReader::new(file));
        Ok(())
    }

    /// Reads whatever complete line is available right now.
    ///
    /// `Ok(None)` means the end of the available data was reached; any partial line
    /// stays buffered until its newline arrives.
    pub async fn try_next_line(&mut self) -> Result<Option<RawLine>, TailError> {
        if self.reader.is_none() {
            self.reopen().await?;
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let before = self.partial.len();
        let result = reader.read_until(b'\n', &mut self.partial).await;
        self.offset += (self.partial.len() - before) as u64;

        match result {
            Ok(_) if self.partial.last() == Some(&b'\n') => {
                let mut line = std::mem::take(&mut self.partial);
                line.pop();
                Ok(Some(trim_line_bytes(line)))
            }
            Ok(_) => Ok(None),
            Err(source) => {
                self.reader = None;
                Err(TailError::Read {
                    path: self.path.clone(),
                    offset: self.offset,
                    source,
                })
            }
        }
    }

    /// Waits until a complete line is available. Returns `Ok(None)` once cancelled.
    pub async fn next_line(
        &mut self,
        poll_interval: Duration,
        wakeups: Option<&mut FileWakeups>,
        cancel_token: &CancellationToken,
    ) -> Result<Option<RawLine>, TailError> {
        let mut wakeups = wakeups;
        loop {
            if cancel_token.is_cancelled() {
                return Ok(None);
            }
            if let Some(line) = self.try_next_line().await? {
                return Ok(Some(line));
            }

            let woken = async {
                match wakeups.as_deref_mut() {
                    Some(wakeups) => wakeups.changed().await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return Ok(None),
                _ = woken => {}
                _ = sleep(poll_interval) => {}
            }
        }
    }
}

/// Tails `file_path` onto `line_tx` until `cancel_token` fires.
///
/// Failing to open the file up front is fatal. Read failures afterwards reopen the
/// file at the last consumed offset with exponential backoff, giving up after
/// `max_restarts` consecutive failures. A full `line_tx` blocks the tailer, which
/// is the pipeline's backpressure point; lines are delayed, never dropped.
///
/// `cancel_token` is only checked between lines. A line that was already read is
/// still delivered after it fires; only `abort` gives up on a blocked send.
pub async fn tail_file(
    file_path: PathBuf,
    line_tx: flume::Sender<RawLine>,
    stats: Arc<PipelineStats>,
    config: TailerConfig,
    cancel_token: CancellationToken,
    abort: CancellationToken,
) -> Result<(), TailError> {
    let TailerConfig {
        poll_interval,
        max_restarts,
        restart_base_delay,
        watch_events,
    } = config;
    let poll_interval = if poll_interval.is_zero() {
        Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
    } else {
        poll_interval
    };

    let mut tailer = Tailer::open_at_end(&file_path).await?;

    let mut wakeups = if watch_events {
        match FileWakeups::watch(&file_path) {
            Ok(wakeups) => Some(wakeups),
            Err(err) => {
                warn!(error = %err, path = %file_path.display(), "file watcher unavailable; polling only");
                None
            }
        }
    } else {
        None
    };

    info!(
        path = %file_path.display(),
        offset = tailer.offset(),
        poll_interval_ms = poll_interval.as_millis() as u64,
        "starting tailer at end of file"
    );

    let mut failures: u32 = 0;
    loop {
        match tailer
            .next_line(poll_interval, wakeups.as_mut(), &cancel_token)
            .await
        {
            Ok(Some(line)) => {
                failures = 0;
                stats.record_line_read();
                LINES_READ_TOTAL.inc();

                tokio::select! {
                    biased;
                    sent = line_tx.send_async(line) => {
                        if sent.is_err() {
                            debug!(path = %file_path.display(), "line queue closed; stopping tailer");
                            return Ok(());
                        }
                    }
                    _ = abort.cancelled() => {
                        warn!(
                            path = %file_path.display(),
                            offset = tailer.offset(),
                            "tailer aborted with a line in flight"
                        );
                        break;
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                failures += 1;
                if failures > max_restarts {
                    return Err(TailError::RestartsExhausted {
                        path: file_path,
                        attempts: failures,
                        last: Box::new(err),
                    });
                }

                TAILER_RESTARTS_TOTAL.inc();
                let backoff = restart_backoff(restart_base_delay, failures);
                warn!(
                    error = %err,
                    path = %file_path.display(),
                    attempt = failures,
                    max_attempts = max_restarts,
                    backoff_ms = backoff.as_millis() as u64,
                    "tailer read failed; reopening after backoff"
                );
                tailer.invalidate();
                if sleep_or_cancel(backoff, &cancel_token).await {
                    break;
                }
            }
        }
    }

    info!(path = %file_path.display(), offset = tailer.offset(), "tailer stopped");
    Ok(())
}

fn restart_backoff(base: Duration, attempt: u32) -> Duration {
    let base = base.max(Duration::from_millis(1));
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    base.saturating_mul(factor).min(MAX_RESTART_BACKOFF)
}
