//! Query results delivered from a background thread.
//!
//! A [`ResultStream`] owns a producer thread that walks a shared
//! [`TreeIndex`] and sends owned copies of each hit through a
//! `crossbeam-channel`. The consumer pulls items at its own pace; cancelling
//! or dropping the stream disconnects the channel, the producer notices on
//! its next send, and the thread is joined before the stream is gone.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, bounded, unbounded};
use log::{debug, warn};

use crate::models::Interval;
use crate::node::IntervalId;
use crate::query::Predicate;
use crate::tree_index::TreeIndex;

/// One streamed result: the handle and an owned copy of the interval.
pub type StreamItem<T> = (IntervalId, Interval<T>);

/// Lazy, cancellable sequence of query results produced on another thread.
///
/// Items arrive in ascending start order. With a bounded
/// `stream_capacity` the producer runs at most that many items ahead of the
/// consumer.
pub struct ResultStream<T> {
    rx: Option<Receiver<StreamItem<T>>>,
    handle: Option<JoinHandle<()>>,
}

impl<T> ResultStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn spawn(
        index: &Arc<TreeIndex<T>>,
        key: &str,
        start: i64,
        end: i64,
        predicate: Predicate,
    ) -> Self {
        // surface a stale tree here rather than inside the producer
        if predicate != Predicate::All {
            index.assert_queryable(key);
        }

        let (tx, rx) = match index.config().stream_capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        let index = Arc::clone(index);
        let key = key.to_string();

        let handle = thread::spawn(move || {
            for hit in index.query_bounds(&key, start, end, predicate) {
                if tx.send((hit.id, hit.interval.clone())).is_err() {
                    debug!("result stream for {key} closed by consumer");
                    return;
                }
            }
        });

        ResultStream {
            rx: Some(rx),
            handle: Some(handle),
        }
    }

    /// Stop the producer and wait for its thread to exit.
    pub fn cancel(self) {
        drop(self);
    }
}

impl<T> Iterator for ResultStream<T> {
    type Item = StreamItem<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.as_ref()?.recv().ok()
    }
}

impl<T> Drop for ResultStream<T> {
    fn drop(&mut self) {
        // disconnect first so a producer blocked on a full channel wakes up
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("result stream producer thread panicked");
            }
        }
    }
}

impl<T> TreeIndex<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Threaded [`intersect`](Self::intersect).
    pub fn intersect_stream<Q>(
        self: &Arc<Self>,
        query: &Interval<Q>,
        overlap: i64,
    ) -> ResultStream<T> {
        ResultStream::spawn(
            self,
            query.key(),
            query.start(),
            query.end(),
            Predicate::Intersect { overlap },
        )
    }

    /// Threaded [`contain`](Self::contain).
    pub fn contain_stream<Q>(self: &Arc<Self>, query: &Interval<Q>, slop: i64) -> ResultStream<T> {
        ResultStream::spawn(
            self,
            query.key(),
            query.start(),
            query.end(),
            Predicate::Contain { slop },
        )
    }

    /// Threaded [`within`](Self::within).
    pub fn within_stream<Q>(self: &Arc<Self>, query: &Interval<Q>, slop: i64) -> ResultStream<T> {
        ResultStream::spawn(
            self,
            query.key(),
            query.start(),
            query.end(),
            Predicate::Within { slop },
        )
    }

    /// Threaded [`traverse`](Self::traverse).
    pub fn traverse_stream(self: &Arc<Self>, key: &str) -> ResultStream<T> {
        ResultStream::spawn(self, key, 0, 0, Predicate::All)
    }
}
