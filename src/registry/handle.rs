//! Consumer handles
//!
//! A [`ConsumerHandle`] is the registry-side view of one live consumer
//! connection: frames are pushed into a bounded queue that the connection's
//! own task drains onto its socket, and a close signal tells that task to
//! tear the connection down.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use super::error::RelayError;

static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

struct HandleInner {
    id: u64,
    tx: mpsc::Sender<Bytes>,
    closed: watch::Sender<bool>,
}

/// Writable, closable handle to a consumer connection
///
/// Clones refer to the same connection. Identity comparisons use
/// [`ConsumerHandle::same`], never the queued contents.
#[derive(Clone)]
pub struct ConsumerHandle {
    inner: Arc<HandleInner>,
}

/// Connection-side half of a [`ConsumerHandle`]
pub struct ConsumerReceiver {
    rx: mpsc::Receiver<Bytes>,
    closed: watch::Receiver<bool>,
}

impl ConsumerHandle {
    /// Create a handle with an outbound queue of `capacity` frames
    pub fn new(capacity: usize) -> (Self, ConsumerReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (closed_tx, closed_rx) = watch::channel(false);

        let handle = Self {
            inner: Arc::new(HandleInner {
                id: NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed),
                tx,
                closed: closed_tx,
            }),
        };

        (
            handle,
            ConsumerReceiver {
                rx,
                closed: closed_rx,
            },
        )
    }

    /// Process-unique id of this handle
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether `other` refers to the same connection
    pub fn same(&self, other: &ConsumerHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Queue a frame for delivery without waiting
    pub fn forward(&self, frame: Bytes) -> Result<(), RelayError> {
        if self.is_closed() {
            return Err(RelayError::ConsumerClosed);
        }

        self.inner.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RelayError::ConsumerLagging,
            mpsc::error::TrySendError::Closed(_) => RelayError::ConsumerClosed,
        })
    }

    /// Signal the connection to close
    ///
    /// Returns `true` only for the call that actually closed the handle.
    pub fn close(&self) -> bool {
        !self.inner.closed.send_replace(true)
    }

    /// Whether the handle was closed or its connection task is gone
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow() || self.inner.tx.is_closed()
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConsumerReceiver {
    /// Receive the next relayed frame
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Receive a frame if one is already queued
    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Future resolving once the handle has been closed
    ///
    /// The future does not borrow the receiver, so it can be polled
    /// alongside [`recv`](Self::recv).
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut closed = self.closed.clone();
        async move {
            let _ = closed.wait_for(|closed| *closed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_and_receive() {
        let (handle, mut rx) = ConsumerHandle::new(4);

        handle.forward(Bytes::from_static(b"frame")).unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"frame"));
    }

    #[test]
    fn test_close_reports_first_call_only() {
        let (handle, _rx) = ConsumerHandle::new(4);

        assert!(handle.close());
        assert!(!handle.close());
        assert!(handle.is_closed());
        assert_eq!(
            handle.forward(Bytes::from_static(b"late")),
            Err(RelayError::ConsumerClosed)
        );
    }

    #[test]
    fn test_full_queue_is_lagging() {
        let (handle, _rx) = ConsumerHandle::new(1);

        handle.forward(Bytes::from_static(b"a")).unwrap();
        assert_eq!(
            handle.forward(Bytes::from_static(b"b")),
            Err(RelayError::ConsumerLagging)
        );
    }

    #[test]
    fn test_dropped_receiver_is_closed() {
        let (handle, rx) = ConsumerHandle::new(4);
        drop(rx);

        assert!(handle.is_closed());
        assert_eq!(
            handle.forward(Bytes::from_static(b"x")),
            Err(RelayError::ConsumerClosed)
        );
    }

    #[test]
    fn test_identity() {
        let (a, _rx_a) = ConsumerHandle::new(1);
        let (b, _rx_b) = ConsumerHandle::new(1);

        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_closed_future_pending_until_close() {
        let (handle, rx) = ConsumerHandle::new(1);
        let mut closed = tokio_test::task::spawn(rx.closed());

        tokio_test::assert_pending!(closed.poll());
        handle.close();
        assert!(closed.is_woken());
        tokio_test::assert_ready!(closed.poll());
    }

    #[tokio::test]
    async fn test_closed_future_resolves() {
        let (handle, rx) = ConsumerHandle::new(1);

        let waiter = tokio::spawn(rx.closed());
        handle.close();

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
