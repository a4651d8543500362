//! Bounded frame queue between the decode worker and the sink feed
//!
//! Every item is stamped with the epoch it was produced for. `flush` bumps
//! the queue epoch and drains what is buffered; anything the decoder still
//! had in flight carries the old epoch and is thrown away by `pop`, so a
//! frame decoded before a seek can never reach the sink.

use crate::error::{PlaybackError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use retro_audio::AudioFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What travels through the queue
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    Frame(AudioFrame),
    /// The decoder has nothing more for this epoch
    EndOfStream,
}

/// Why a push did not go through
#[derive(Debug)]
pub enum PushError {
    /// Queue stayed full for the whole timeout; the item is handed back
    Timeout(QueueItem),
    /// Item belongs to an epoch the queue has already flushed
    Stale,
    /// Consumer side is gone
    Closed,
}

#[derive(Debug)]
struct Stamped {
    epoch: u64,
    item: QueueItem,
}

/// Epoch-stamped bounded queue.
///
/// Clones share the same channel; by convention one clone pushes (decode
/// worker), one pops (sink feed) and the transport flushes.
#[derive(Debug, Clone)]
pub struct FrameQueue {
    tx: Sender<Stamped>,
    rx: Receiver<Stamped>,
    epoch: Arc<AtomicU64>,
    capacity: usize,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` items, starting at `epoch`
    pub fn new(capacity: usize, epoch: u64) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            epoch: Arc::new(AtomicU64::new(epoch)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items currently buffered, stale ones included
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Epoch that `pop` currently accepts
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Push an item produced for `epoch`, waiting up to `timeout` for room
    pub fn push(
        &self,
        item: QueueItem,
        epoch: u64,
        timeout: Duration,
    ) -> std::result::Result<(), PushError> {
        if epoch != self.epoch() {
            return Err(PushError::Stale);
        }
        match self.tx.send_timeout(Stamped { epoch, item }, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(stamped)) => Err(PushError::Timeout(stamped.item)),
            Err(SendTimeoutError::Disconnected(_)) => Err(PushError::Closed),
        }
    }

    /// Pop the next item of the current epoch, waiting up to `timeout`.
    ///
    /// Stale items are discarded without counting against the timeout
    /// budget beyond the time it takes to skip them.
    ///
    /// # Errors
    /// `QueueTimeout` when nothing current arrived in time.
    pub fn pop(&self, timeout: Duration) -> Result<QueueItem> {
        self.pop_stamped(timeout).map(|(_, item)| item)
    }

    /// [`pop`](Self::pop), also returning the epoch the item belongs to
    pub fn pop_stamped(&self, timeout: Duration) -> Result<(u64, QueueItem)> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(stamped) if stamped.epoch == self.epoch() => {
                    return Ok((stamped.epoch, stamped.item))
                }
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => return Err(PlaybackError::QueueTimeout),
                Err(RecvTimeoutError::Disconnected) => return Err(PlaybackError::Disconnected),
            }
        }
    }

    /// Non-blocking [`pop`](Self::pop)
    pub fn try_pop(&self) -> Option<QueueItem> {
        while let Ok(stamped) = self.rx.try_recv() {
            if stamped.epoch == self.epoch() {
                return Some(stamped.item);
            }
        }
        None
    }

    /// Move to `epoch` and drop everything buffered. Returns the number of
    /// items discarded.
    pub fn flush(&self, epoch: u64) -> usize {
        self.epoch.store(epoch, Ordering::Release);
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retro_audio::StreamSpec;

    fn frame(index: u64) -> QueueItem {
        QueueItem::Frame(AudioFrame::silence(StreamSpec::cd(), 16, index, index * 16))
    }

    fn index_of(item: &QueueItem) -> Option<u64> {
        match item {
            QueueItem::Frame(f) => Some(f.index()),
            QueueItem::EndOfStream => None,
        }
    }

    #[test]
    fn fifo_order() {
        let queue = FrameQueue::new(4, 0);
        for i in 0..3 {
            queue.push(frame(i), 0, Duration::ZERO).unwrap();
        }
        queue.push(QueueItem::EndOfStream, 0, Duration::ZERO).unwrap();

        for i in 0..3 {
            let item = queue.pop(Duration::from_millis(10)).unwrap();
            assert_eq!(index_of(&item), Some(i));
        }
        assert_eq!(
            queue.pop(Duration::from_millis(10)).unwrap(),
            QueueItem::EndOfStream
        );
    }

    #[test]
    fn push_times_out_when_full() {
        let queue = FrameQueue::new(2, 0);
        queue.push(frame(0), 0, Duration::ZERO).unwrap();
        queue.push(frame(1), 0, Duration::ZERO).unwrap();

        let start = Instant::now();
        match queue.push(frame(2), 0, Duration::from_millis(20)) {
            Err(PushError::Timeout(item)) => assert_eq!(index_of(&item), Some(2)),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn pop_times_out_when_empty() {
        let queue = FrameQueue::new(2, 0);
        let start = Instant::now();
        assert!(matches!(
            queue.pop(Duration::from_millis(15)),
            Err(PlaybackError::QueueTimeout)
        ));
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(15));
        assert!(waited < Duration::from_millis(500));
    }

    #[test]
    fn flush_discards_buffered_and_in_flight_frames() {
        let queue = FrameQueue::new(8, 0);
        for i in 0..5 {
            queue.push(frame(i), 0, Duration::ZERO).unwrap();
        }

        assert_eq!(queue.flush(1), 5);
        assert!(queue.is_empty());

        // A producer that has not heard about the flush yet
        assert!(matches!(
            queue.push(frame(99), 0, Duration::ZERO),
            Err(PushError::Stale)
        ));

        queue.push(frame(7), 1, Duration::ZERO).unwrap();
        let item = queue.pop(Duration::from_millis(10)).unwrap();
        assert_eq!(index_of(&item), Some(7));
    }

    #[test]
    fn stale_items_racing_a_flush_are_skipped() {
        let queue = FrameQueue::new(8, 0);
        queue.push(frame(1), 0, Duration::ZERO).unwrap();
        queue.push(frame(2), 0, Duration::ZERO).unwrap();

        // Epoch advanced without draining, as if the push raced the flush
        queue.epoch.store(1, Ordering::Release);
        queue.push(frame(3), 1, Duration::ZERO).unwrap();

        let item = queue.pop(Duration::from_millis(10)).unwrap();
        assert_eq!(index_of(&item), Some(3));
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn producer_and_consumer_on_separate_threads() {
        let queue = FrameQueue::new(3, 0);
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..50 {
                producer
                    .push(frame(i), 0, Duration::from_secs(1))
                    .map_err(|_| ())
                    .unwrap();
            }
        });

        for i in 0..50 {
            let item = queue.pop(Duration::from_secs(1)).unwrap();
            assert_eq!(index_of(&item), Some(i));
        }
        handle.join().unwrap();
    }
}
