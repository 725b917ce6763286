use anyhow::{Context, Result};
use notify::{
    Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::path::Path;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info};

/// Wakeups are coalesced, so one pending slot is enough.
pub const WAKEUP_CHANNEL_CAPACITY: usize = 1;

/// Filesystem change notifications for the tailed file.
///
/// Used to cut tail latency below the poll interval; the tailer keeps polling
/// regardless, so a missed event only costs one interval.
pub struct FileWakeups {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<()>,
}

impl FileWakeups {
    pub fn watch(path: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel(WAKEUP_CHANNEL_CAPACITY);

        let mut watcher = RecommendedWatcher::new(
            move |res| match res {
                Ok(event) => handle_event(&tx, event),
                Err(err) => error!(error = %err, "file watcher error"),
            },
            NotifyConfig::default(),
        )
        .context("failed to create notify watcher")?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch path {}", path.display()))?;

        info!(path = %path.display(), "file watcher started");

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Resolves on the next change event. Never resolves once the watcher is gone.
    pub async fn changed(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

fn handle_event(tx: &mpsc::Sender<()>, event: Event) {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => {
            debug!(paths = ?event.paths, "detected file change");
            match tx.try_send(()) {
                Ok(_) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => {
                    debug!("wakeup channel closed; dropping file event");
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};
    use std::path::PathBuf;

    fn event(kind: EventKind) -> Event {
        Event::new(kind).add_path(PathBuf::from("/tmp/access.log"))
    }

    #[test]
    fn coalesces_change_events() {
        let (tx, mut rx) = mpsc::channel(WAKEUP_CHANNEL_CAPACITY);
        handle_event(&tx, event(EventKind::Modify(ModifyKind::Any)));
        handle_event(&tx, event(EventKind::Create(CreateKind::File)));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ignores_access_events() {
        let (tx, mut rx) = mpsc::channel(WAKEUP_CHANNEL_CAPACITY);
        handle_event(
            &tx,
            event(EventKind::Access(notify::event::AccessKind::Any)),
        );
        assert!(rx.try_recv().is_err());
    }
}
