//! Ordered, coalescing serialiser for outbound payloads.
//!
//! Producers enqueue through an mpsc channel; a single worker task drains
//! everything buffered at the moment it wakes, concatenates it into one
//! batch, and performs a single `transport.send`. Each producer's `send`
//! resolves only once its payload has reached the transport (or the queue
//! stopped). After a transport failure the queue is poisoned: every later
//! send fails with the same cause until the queue is stopped.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{ProtocolError, Result, SignalRClientError, TransportError};
use crate::transport::{Payload, Transport};

struct QueueItem {
    payload: Payload,
    completion: oneshot::Sender<Result<()>>,
}

/// The connection's outbound send queue.
pub(crate) struct SendQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
    stop_signal: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SendQueue {
    /// Spawns the worker task draining into `transport`.
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stop_signal = Arc::new(Notify::new());
        let worker = tokio::spawn(worker_loop(rx, transport, Arc::clone(&stop_signal)));
        Self {
            tx,
            stop_signal,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueues `payload` and resolves once it has been flushed to the
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns [`SignalRClientError::Cancelled`] when the queue has been
    /// stopped, or the transport failure that flushed (or poisoned) the
    /// batch this payload belonged to.
    pub(crate) async fn send(&self, payload: Payload) -> Result<()> {
        let (completion, done) = oneshot::channel();
        self.tx
            .send(QueueItem {
                payload,
                completion,
            })
            .map_err(|_| SignalRClientError::Cancelled)?;
        done.await.map_err(|_| SignalRClientError::Cancelled)?
    }

    /// Stops the worker: cancels any in-flight transport send, fails every
    /// pending producer with `Cancelled`, and joins the task. Idempotent.
    pub(crate) async fn stop(&self) {
        self.stop_signal.notify_one();
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        debug!("send queue stopped");
    }
}

async fn worker_loop(
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
    transport: Arc<dyn Transport>,
    stop_signal: Arc<Notify>,
) {
    let mut poisoned: Option<TransportError> = None;
    loop {
        let first = tokio::select! {
            biased;
            _ = stop_signal.notified() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        // Everything buffered right now becomes one batch.
        let mut batch = vec![first];
        while let Ok(item) = rx.try_recv() {
            batch.push(item);
        }

        if let Some(error) = &poisoned {
            for item in batch {
                let _ = item.completion.send(Err(error.clone().into()));
            }
            continue;
        }

        let mut completions = Vec::with_capacity(batch.len());
        let mut payloads = Vec::with_capacity(batch.len());
        for item in batch {
            payloads.push(item.payload);
            completions.push(item.completion);
        }

        let Some(payload) = coalesce(payloads) else {
            for completion in completions {
                let _ = completion.send(Err(ProtocolError::ProtocolMismatch.into()));
            }
            continue;
        };
        trace!(
            frames = completions.len(),
            bytes = payload.len(),
            "flushing batched payloads"
        );

        let outcome = tokio::select! {
            biased;
            _ = stop_signal.notified() => None,
            result = transport.send(payload) => Some(result),
        };
        match outcome {
            Some(Ok(())) => {
                for completion in completions {
                    let _ = completion.send(Ok(()));
                }
            }
            Some(Err(error)) => {
                for completion in completions {
                    let _ = completion.send(Err(error.clone().into()));
                }
                poisoned = Some(error);
            }
            None => {
                for completion in completions {
                    let _ = completion.send(Err(SignalRClientError::Cancelled));
                }
                break;
            }
        }
    }

    // Fail whatever is still queued, then drop the channel.
    rx.close();
    while let Ok(item) = rx.try_recv() {
        let _ = item.completion.send(Err(SignalRClientError::Cancelled));
    }
}

/// Concatenates buffered payloads byte-wise in append order. Returns `None`
/// when kinds are mixed, which cannot happen for a connection holding a
/// single transfer format.
fn coalesce(payloads: Vec<Payload>) -> Option<Payload> {
    let mut iter = payloads.into_iter();
    match iter.next()? {
        Payload::Text(mut text) => {
            for payload in iter {
                match payload {
                    Payload::Text(next) => text.push_str(&next),
                    Payload::Binary(_) => return None,
                }
            }
            Some(Payload::Text(text))
        }
        Payload::Binary(mut bytes) => {
            for payload in iter {
                match payload {
                    Payload::Binary(next) => bytes.extend_from_slice(&next),
                    Payload::Text(_) => return None,
                }
            }
            Some(Payload::Binary(bytes))
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use url::Url;

    use crate::transport::{OnClose, OnReceive, TransferFormat};

    /// Transport stub recording batches, optionally failing or blocking.
    struct RecordingTransport {
        batches: Arc<StdMutex<Vec<Payload>>>,
        fail_sends: AtomicBool,
        gate: Option<Arc<Notify>>,
    }

    impl RecordingTransport {
        fn new() -> (Arc<Self>, Arc<StdMutex<Vec<Payload>>>) {
            let batches = Arc::new(StdMutex::new(Vec::new()));
            let transport = Arc::new(Self {
                batches: Arc::clone(&batches),
                fail_sends: AtomicBool::new(false),
                gate: None,
            });
            (transport, batches)
        }

        fn gated() -> (Arc<Self>, Arc<StdMutex<Vec<Payload>>>, Arc<Notify>) {
            let batches = Arc::new(StdMutex::new(Vec::new()));
            let gate = Arc::new(Notify::new());
            let transport = Arc::new(Self {
                batches: Arc::clone(&batches),
                fail_sends: AtomicBool::new(false),
                gate: Some(Arc::clone(&gate)),
            });
            (transport, batches, gate)
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn connect(
            &mut self,
            _url: &Url,
            _transfer_format: TransferFormat,
        ) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        async fn send(&self, payload: Payload) -> std::result::Result<(), TransportError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(TransportError::NotOpen);
            }
            self.batches.lock().unwrap().push(payload);
            Ok(())
        }

        async fn stop(&self) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        fn set_on_receive(&mut self, _callback: OnReceive) {}
        fn set_on_close(&mut self, _callback: OnClose) {}
    }

    #[tokio::test]
    async fn send_resolves_after_flush() {
        let (transport, batches) = RecordingTransport::new();
        let queue = SendQueue::new(transport);

        queue.send(Payload::Text("one\u{1e}".into())).await.unwrap();

        assert_eq!(batches.lock().unwrap().len(), 1);
        queue.stop().await;
    }

    #[tokio::test]
    async fn buffered_payloads_coalesce_into_one_batch_in_order() {
        let (transport, batches, gate) = RecordingTransport::gated();
        let queue = Arc::new(SendQueue::new(transport));

        // First send occupies the worker behind the gate.
        let q = Arc::clone(&queue);
        let blocked = tokio::spawn(async move { q.send(Payload::Text("a\u{1e}".into())).await });
        tokio::task::yield_now().await;

        // These queue up while the worker is busy.
        let q2 = Arc::clone(&queue);
        let second = tokio::spawn(async move { q2.send(Payload::Text("b\u{1e}".into())).await });
        let q3 = Arc::clone(&queue);
        let third = tokio::spawn(async move { q3.send(Payload::Text("c\u{1e}".into())).await });
        tokio::task::yield_now().await;

        // Release the first batch, then the coalesced one.
        gate.notify_one();
        blocked.await.unwrap().unwrap();
        gate.notify_one();
        second.await.unwrap().unwrap();
        third.await.unwrap().unwrap();

        let seen = batches.lock().unwrap();
        assert_eq!(seen[0], Payload::Text("a\u{1e}".into()));
        assert_eq!(seen[1], Payload::Text("b\u{1e}c\u{1e}".into()));
        queue.stop().await;
    }

    #[tokio::test]
    async fn transport_failure_poisons_the_queue_with_the_same_error() {
        let (transport, _batches) = RecordingTransport::new();
        transport.fail_sends.store(true, Ordering::SeqCst);
        let queue = SendQueue::new(transport);

        let first = queue.send(Payload::Text("x\u{1e}".into())).await;
        assert!(matches!(
            first,
            Err(SignalRClientError::Transport(TransportError::NotOpen))
        ));

        let second = queue.send(Payload::Text("y\u{1e}".into())).await;
        assert!(matches!(
            second,
            Err(SignalRClientError::Transport(TransportError::NotOpen))
        ));

        queue.stop().await;
    }

    #[tokio::test]
    async fn stop_cancels_in_flight_and_pending_sends() {
        let (transport, batches, _gate) = RecordingTransport::gated();
        let queue = Arc::new(SendQueue::new(transport));

        let q = Arc::clone(&queue);
        let pending = tokio::spawn(async move { q.send(Payload::Text("never\u{1e}".into())).await });
        tokio::task::yield_now().await;

        queue.stop().await;

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(SignalRClientError::Cancelled)));
        assert!(batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_after_stop_is_cancelled() {
        let (transport, _batches) = RecordingTransport::new();
        let queue = SendQueue::new(transport);
        queue.stop().await;

        let result = queue.send(Payload::Text("late\u{1e}".into())).await;
        assert!(matches!(result, Err(SignalRClientError::Cancelled)));
    }

    #[test]
    fn coalesce_concatenates_in_append_order() {
        let payload = coalesce(vec![
            Payload::Binary(vec![1, 2]),
            Payload::Binary(vec![3]),
            Payload::Binary(vec![4, 5]),
        ])
        .unwrap();
        assert_eq!(payload, Payload::Binary(vec![1, 2, 3, 4, 5]));
    }

    #[test]
    fn coalesce_rejects_mixed_kinds() {
        assert!(coalesce(vec![
            Payload::Text("a".into()),
            Payload::Binary(vec![1]),
        ])
        .is_none());
    }
}
