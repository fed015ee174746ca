//! Progress streams for long-running syncs.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use super::{CancelHandle, CancelToken, SyncContext, SyncProgress, SyncService};
use crate::error::SyncError;

/// Buffered events before a slow consumer applies backpressure.
const EVENT_BUFFER: usize = 32;

// == Sync Event ==
/// One item of a collection sync stream. The stream ends after `Complete`
/// or `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent<R> {
    Progress(SyncProgress),
    Complete(Vec<R>),
    Failed(SyncError),
}

impl<R> SyncEvent<R> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncEvent::Complete(_) | SyncEvent::Failed(_))
    }
}

// == Stream Collection ==
/// Spawns a sync of `name` and returns its event stream with a handle that
/// cancels it.
///
/// Dropping the receiver does not stop the sync; call
/// [`CancelHandle::cancel`] for that.
pub fn stream_collection<S>(
    service: Arc<S>,
    name: impl Into<String>,
) -> (CancelHandle, mpsc::Receiver<SyncEvent<S::Record>>)
where
    S: SyncService + 'static,
{
    let name = name.into();
    let (handle, token) = CancelToken::new();
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

    tokio::spawn(async move {
        let (ctx, mut progress_rx) = SyncContext::with_cancel(token).with_progress();

        let result = {
            let sync = service.get_collection_with(&name, &ctx);
            tokio::pin!(sync);

            loop {
                tokio::select! {
                    biased;
                    Some(progress) = progress_rx.recv() => {
                        let _ = events_tx.send(SyncEvent::Progress(progress)).await;
                    }
                    result = &mut sync => break result,
                }
            }
        };

        drop(ctx);
        while let Ok(progress) = progress_rx.try_recv() {
            let _ = events_tx.send(SyncEvent::Progress(progress)).await;
        }

        let terminal = match result {
            Ok(records) => {
                debug!("Stream for '{}' complete with {} records", name, records.len());
                SyncEvent::Complete(records)
            }
            Err(e) => SyncEvent::Failed(e),
        };
        let _ = events_tx.send(terminal).await;
    });

    (handle, events_rx)
}
