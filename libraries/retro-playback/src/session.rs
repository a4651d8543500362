//! Per-track decode worker
//!
//! Each track that starts playing gets its own thread, decoder and
//! [`FrameQueue`]. The worker decodes ahead until the queue is full, then
//! blocks on the queue in short slices so it can still react to a seek or
//! stop. Nothing here outlives the track.

use crate::events::PipelineEvent;
use crate::queue::{FrameQueue, PushError, QueueItem};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use retro_audio::FrameDecoder;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long one blocked push waits before the worker rechecks its controls
const PUSH_SLICE: Duration = Duration::from_millis(20);

/// How long the worker waits for the seek that must follow a flush
const STALE_WAIT: Duration = Duration::from_millis(50);

const EVENT_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
enum SessionControl {
    Seek { epoch: u64, position: Duration },
    Stop,
}

/// Handle to a running decode worker
pub(crate) struct DecodeSession {
    id: u64,
    queue: FrameQueue,
    control: Sender<SessionControl>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeSession {
    /// Start decoding into `queue` for the queue's current epoch
    pub fn spawn(
        id: u64,
        decoder: Box<dyn FrameDecoder>,
        queue: FrameQueue,
        events: Sender<PipelineEvent>,
    ) -> std::io::Result<Self> {
        let (control, control_rx) = unbounded();
        let worker = DecodeWorker {
            session: id,
            epoch: queue.epoch(),
            decoder,
            queue: queue.clone(),
            control: control_rx,
            events,
            finished: false,
        };

        let handle = thread::Builder::new()
            .name(format!("retro-decode-{}", id))
            .spawn(move || worker.run())?;

        Ok(Self {
            id,
            queue,
            control,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn queue(&self) -> &FrameQueue {
        &self.queue
    }

    /// Ask the worker to reposition. A newer seek sent before the worker
    /// gets to this one replaces it.
    pub fn seek(&self, epoch: u64, position: Duration) {
        if self
            .control
            .send(SessionControl::Seek { epoch, position })
            .is_err()
        {
            tracing::debug!("Decode worker {} already gone", self.id);
        }
    }

    /// Stop the worker and wait for it to release the file
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.control.send(SessionControl::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Decode worker {} panicked", self.id);
            }
        }
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct DecodeWorker {
    session: u64,
    epoch: u64,
    decoder: Box<dyn FrameDecoder>,
    queue: FrameQueue,
    control: Receiver<SessionControl>,
    events: Sender<PipelineEvent>,
    /// End-of-stream delivered; idle until seek or stop
    finished: bool,
}

impl DecodeWorker {
    fn run(mut self) {
        tracing::debug!("Decode worker {} started", self.session);

        loop {
            if self.finished {
                match self.control.recv() {
                    Ok(msg) => {
                        if !self.handle(msg) || !self.drain_control() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
                continue;
            }

            if !self.drain_control() {
                break;
            }
            if self.finished {
                continue;
            }

            let item = self.next_item();
            if !self.deliver(item) {
                break;
            }
        }

        tracing::debug!("Decode worker {} stopped", self.session);
    }

    fn next_item(&mut self) -> QueueItem {
        match self.decoder.next_frame() {
            Ok(Some(frame)) => QueueItem::Frame(frame),
            Ok(None) => {
                self.finished = true;
                QueueItem::EndOfStream
            }
            Err(e) => {
                tracing::warn!("Decode failed, ending track early: {}", e);
                self.send_event(PipelineEvent::DecodeFailed {
                    session: self.session,
                    error: e.to_string(),
                });
                self.finished = true;
                QueueItem::EndOfStream
            }
        }
    }

    /// Push `item`, servicing controls while the queue is full.
    /// Returns `false` when the worker should exit.
    fn deliver(&mut self, mut item: QueueItem) -> bool {
        loop {
            match self.queue.push(item, self.epoch, PUSH_SLICE) {
                Ok(()) => return true,
                Err(PushError::Closed) => return false,
                Err(PushError::Stale) => {
                    // Flushed for a seek that has not arrived yet
                    return self.wait_control(STALE_WAIT);
                }
                Err(PushError::Timeout(returned)) => {
                    let epoch = self.epoch;
                    if !self.drain_control() {
                        return false;
                    }
                    if self.epoch != epoch {
                        return true;
                    }
                    item = returned;
                }
            }
        }
    }

    fn wait_control(&mut self, timeout: Duration) -> bool {
        match self.control.recv_timeout(timeout) {
            Ok(msg) => self.handle(msg) && self.drain_control(),
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Apply everything waiting: stop wins, otherwise only the newest seek
    /// runs.
    fn drain_control(&mut self) -> bool {
        let mut latest = None;
        loop {
            match self.control.try_recv() {
                Ok(SessionControl::Stop) => return false,
                Ok(seek) => latest = Some(seek),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
        match latest {
            Some(msg) => self.handle(msg),
            None => true,
        }
    }

    fn handle(&mut self, msg: SessionControl) -> bool {
        match msg {
            SessionControl::Stop => false,
            SessionControl::Seek { epoch, position } => {
                self.epoch = epoch;
                self.finished = false;

                let landed = match self.decoder.seek(position) {
                    Ok(landed) => landed,
                    Err(e) => {
                        tracing::warn!("Seek to {:?} failed: {}", position, e);
                        position
                    }
                };
                tracing::debug!("Decode worker {} repositioned to {:?}", self.session, landed);

                self.send_event(PipelineEvent::SeekCompleted {
                    session: self.session,
                    epoch,
                    position: landed,
                });
                true
            }
        }
    }

    fn send_event(&self, event: PipelineEvent) {
        if self.events.send_timeout(event, EVENT_TIMEOUT).is_err() {
            tracing::warn!("Transport not listening, event dropped");
        }
    }
}
