// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Background writer — the Rust reading of the donor's `Writer<Flow>`
//! template (`sensor/include/writer.hpp`): a single worker task draining a
//! queue of (session, bucket-time) pairs into a [`crate::store::RecordStore`]
//! via a caller-supplied serializer, decoupling record construction from
//! disk I/O.
//!
//! The donor hand-rolls a condition-variable-guarded queue plus a `busy`
//! flag to avoid redundant `pthread_cond_broadcast` calls; a `tokio::sync::
//! mpsc` unbounded channel gives the same "push, wake the single consumer"
//! shape for free, matching `storage::global_writer`'s
//! channel-plus-spawned-task pattern in the donor codebase this crate was
//! adapted from.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;

use crate::record::RecordBuilder;
use crate::store::RecordStore;

enum Command<S> {
    Write(Arc<S>, u32),
    Flush,
}

/// Handle returned to callers (analyzers) for submitting sessions and
/// requesting flushes. Cloning is cheap; every clone shares the same queue
/// and worker task.
#[derive(Clone)]
pub struct WriterHandle<S> {
    tx: mpsc::UnboundedSender<Command<S>>,
}

impl<S> WriterHandle<S> {
    /// Pushes a session onto the unbounded FIFO, matching 4.E: "push onto an
    /// unbounded FIFO under a queue-mutex, then signal the worker." Ordering
    /// guarantee: records submitted from one thread are persisted in
    /// submission order, since the channel and the worker's single-threaded
    /// drain loop both preserve FIFO order.
    pub fn write(&self, session: Arc<S>, bucket_time: u32) {
        let _ = self.tx.send(Command::Write(session, bucket_time));
    }

    /// Requests a flush; honored by the worker once the current batch
    /// drains, per 4.E's "the worker honors it between batches."
    pub fn flush(&self) {
        let _ = self.tx.send(Command::Flush);
    }
}

/// Spawns the worker task and returns a handle plus its `JoinHandle`.
/// `serializer` converts one session into its on-disk record; `root`/
/// `base_name`/`idle_timeout_secs` configure the underlying
/// [`RecordStore`].
pub fn spawn<S, F>(
    root: impl Into<std::path::PathBuf>,
    base_name: impl Into<String>,
    idle_timeout_secs: u32,
    serializer: F,
) -> crate::error::Result<(WriterHandle<S>, tokio::task::JoinHandle<()>)>
where
    S: Send + Sync + 'static,
    F: Fn(&mut RecordBuilder, &S) + Send + Sync + 'static,
{
    let store = RecordStore::initialize(root, base_name, idle_timeout_secs)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(worker_loop(store, rx, serializer));
    Ok((WriterHandle { tx }, handle))
}

async fn worker_loop<S, F>(
    mut store: RecordStore,
    mut rx: mpsc::UnboundedReceiver<Command<S>>,
    serializer: F,
) where
    F: Fn(&mut RecordBuilder, &S) + Send + Sync + 'static,
{
    let mut record = RecordBuilder::new();
    // Closed only once every WriterHandle clone has been dropped, at which
    // point `finish()` semantics (drain then stop) fall out of `recv`
    // returning `None` after the queue empties.
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Write(session, bucket_time) => {
                serializer(&mut record, &session);
                if let Err(e) = store.write(record.data(), bucket_time) {
                    error!(error = %e, "record store write failed");
                }
                record.clear();
            }
            Command::Flush => {
                if let Err(e) = store.flush() {
                    error!(error = %e, "record store flush failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    struct Dummy {
        id: u32,
    }

    #[tokio::test]
    async fn writes_persist_in_submission_order() {
        let dir = tempdir().unwrap();
        let (handle, join) = spawn(dir.path(), "dummy", 60, |rb: &mut RecordBuilder, s: &Dummy| {
            rb.u32(s.id);
        })
        .unwrap();

        let t = 1_700_000_000u32;
        for id in 0..5u32 {
            handle.write(Arc::new(Dummy { id }), t);
        }
        handle.flush();
        drop(handle);
        join.await.unwrap();

        let dt = chrono::Local.timestamp_opt((t - t % 3600) as i64, 0).unwrap();
        let path = dir
            .path()
            .join(format!("{:04}", dt.format("%Y")))
            .join(format!("{:02}", dt.format("%m")))
            .join(format!("{:02}", dt.format("%d")))
            .join(format!("dummy_{:02}", dt.format("%H")));
        let records = crate::store::read_all(&path).unwrap();
        assert_eq!(records.len(), 5);
        for (i, (number, bytes)) in records.iter().enumerate() {
            assert_eq!(*number, (i + 1) as u32);
            assert_eq!(u32::from_be_bytes(bytes[..4].try_into().unwrap()), i as u32);
        }
    }
}
