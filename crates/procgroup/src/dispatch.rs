//! Dispatch-side event plumbing.
//!
//! Each session owns one dispatch connection. A dedicated reader task drains
//! frames from it into an [`EventQueue`]; callers pull events back out
//! through [`dispatch`](crate::GroupClient::dispatch) on whatever task suits
//! them. The queue is the only coupling between the two sides, so
//! cancellation is a plain state transition: finalize cancels the reader,
//! the reader closes the queue, and any dispatcher parked on the queue wakes
//! up and returns.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::framing::Frame;
use crate::protocol::ProtocolError;

/// How much work one `dispatch` call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Wait for one event, process it, return.
    One,
    /// Process every event already queued, then return without waiting.
    All,
    /// Process events until the session is finalized or the connection
    /// fails.
    Blocking,
}

/// Why an event queue stopped accepting frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// The session was finalized locally.
    Finalized,
    /// The daemon closed the dispatch connection.
    Disconnected,
    /// The dispatch connection failed.
    Io(String),
}

/// Outcome of a single queue pop.
pub(crate) enum Pop {
    /// A frame was dequeued.
    Item(Frame),
    /// The queue is open but currently empty.
    Empty,
    /// The queue is closed and fully drained.
    Closed(CloseReason),
}

struct Inner {
    items: VecDeque<Frame>,
    closed: Option<CloseReason>,
}

/// Frame queue between the reader task and dispatching callers.
///
/// Closing is sticky and one-shot: the first close wins, later pushes are
/// dropped, and frames queued before the close are still handed out before
/// the close is reported.
pub(crate) struct EventQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl EventQueue {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: None,
            }),
            notify: Notify::new(),
        })
    }

    pub(crate) fn push(&self, frame: Frame) {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.closed.is_some() {
                return;
            }
            inner.items.push_back(frame);
        }
        self.notify.notify_one();
    }

    pub(crate) fn close(&self, reason: CloseReason) {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.closed.is_some() {
                return;
            }
            inner.closed = Some(reason);
        }
        self.notify.notify_waiters();
    }

    pub(crate) fn try_pop(&self) -> Pop {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(frame) = inner.items.pop_front() {
            return Pop::Item(frame);
        }
        match &inner.closed {
            Some(reason) => Pop::Closed(reason.clone()),
            None => Pop::Empty,
        }
    }

    /// Future completing on the next push or close.
    ///
    /// Arm it BEFORE the [`try_pop`](Self::try_pop) whose emptiness it
    /// covers; a push or close landing between the pop and the await is
    /// then never missed. Waiting on it holds no queue state, so callers
    /// must not hold any lock across the await.
    pub(crate) fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .items
            .len()
    }
}

/// Drains the dispatch connection into the queue until cancellation,
/// disconnect, or a stream error. Runs as a spawned task for the lifetime of
/// the session.
pub(crate) async fn run_reader<S>(mut frames: S, queue: Arc<EventQueue>, cancel: CancellationToken)
where
    S: futures::Stream<Item = Result<Frame, ProtocolError>> + Unpin,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("dispatch reader stopping: session finalized");
                queue.close(CloseReason::Finalized);
                return;
            }
            frame = frames.next() => match frame {
                Some(Ok(frame)) => queue.push(frame),
                Some(Err(err)) => {
                    warn!(error = %err, "dispatch connection failed");
                    queue.close(CloseReason::Io(err.to_string()));
                    return;
                }
                None => {
                    debug!("dispatch connection closed by daemon");
                    queue.close(CloseReason::Disconnected);
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use std::time::Duration;

    use super::*;

    fn frame(id: u32) -> Frame {
        Frame::new(id, Bytes::new())
    }

    #[test]
    fn push_pop_preserves_order() {
        let queue = EventQueue::new();
        queue.push(frame(1));
        queue.push(frame(2));

        assert!(matches!(queue.try_pop(), Pop::Item(f) if f.id == 1));
        assert!(matches!(queue.try_pop(), Pop::Item(f) if f.id == 2));
        assert!(matches!(queue.try_pop(), Pop::Empty));
    }

    #[test]
    fn close_drains_queued_frames_first() {
        let queue = EventQueue::new();
        queue.push(frame(1));
        queue.close(CloseReason::Disconnected);

        assert!(matches!(queue.try_pop(), Pop::Item(f) if f.id == 1));
        assert!(matches!(
            queue.try_pop(),
            Pop::Closed(CloseReason::Disconnected)
        ));
    }

    #[test]
    fn push_after_close_is_dropped() {
        let queue = EventQueue::new();
        queue.close(CloseReason::Finalized);
        queue.push(frame(1));
        assert!(matches!(queue.try_pop(), Pop::Closed(CloseReason::Finalized)));
    }

    #[test]
    fn first_close_wins() {
        let queue = EventQueue::new();
        queue.close(CloseReason::Disconnected);
        queue.close(CloseReason::Finalized);
        assert!(matches!(
            queue.try_pop(),
            Pop::Closed(CloseReason::Disconnected)
        ));
    }

    async fn pop_parked(queue: Arc<EventQueue>) -> Pop {
        loop {
            let notified = queue.notified();
            match queue.try_pop() {
                Pop::Empty => notified.await,
                outcome => return outcome,
            }
        }
    }

    #[tokio::test]
    async fn armed_waiter_wakes_on_push() {
        let queue = EventQueue::new();
        let waiter = tokio::spawn(pop_parked(Arc::clone(&queue)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(frame(9));

        let popped = waiter.await.unwrap();
        assert!(matches!(popped, Pop::Item(f) if f.id == 9));
    }

    #[tokio::test]
    async fn armed_waiter_wakes_on_close() {
        let queue = EventQueue::new();
        let waiter = tokio::spawn(pop_parked(Arc::clone(&queue)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close(CloseReason::Finalized);

        let popped = waiter.await.unwrap();
        assert!(matches!(popped, Pop::Closed(CloseReason::Finalized)));
    }

    #[tokio::test]
    async fn wakeup_armed_before_pop_is_not_lost() {
        let queue = EventQueue::new();
        let notified = queue.notified();
        assert!(matches!(queue.try_pop(), Pop::Empty));

        // Push lands after the empty pop but before the await.
        queue.push(frame(3));
        notified.await;
        assert!(matches!(queue.try_pop(), Pop::Item(f) if f.id == 3));
    }

    #[tokio::test]
    async fn reader_feeds_frames_then_closes_on_end() {
        let queue = EventQueue::new();
        let frames = futures::stream::iter(vec![Ok(frame(1)), Ok(frame(2))]);

        run_reader(frames, Arc::clone(&queue), CancellationToken::new()).await;

        assert_eq!(queue.len(), 2);
        assert!(matches!(queue.try_pop(), Pop::Item(f) if f.id == 1));
        assert!(matches!(queue.try_pop(), Pop::Item(f) if f.id == 2));
        assert!(matches!(
            queue.try_pop(),
            Pop::Closed(CloseReason::Disconnected)
        ));
    }

    #[tokio::test]
    async fn reader_reports_stream_errors() {
        let queue = EventQueue::new();
        let frames = futures::stream::iter(vec![
            Ok(frame(1)),
            Err(ProtocolError::invalid("mangled")),
        ]);

        run_reader(frames, Arc::clone(&queue), CancellationToken::new()).await;

        assert!(matches!(queue.try_pop(), Pop::Item(f) if f.id == 1));
        assert!(matches!(queue.try_pop(), Pop::Closed(CloseReason::Io(_))));
    }

    #[tokio::test]
    async fn cancellation_closes_as_finalized() {
        let queue = EventQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        // A pending stream that never yields; cancellation must still stop
        // the reader.
        let frames = futures::stream::pending();
        run_reader(frames, Arc::clone(&queue), cancel).await;

        assert!(matches!(queue.try_pop(), Pop::Closed(CloseReason::Finalized)));
    }
}
