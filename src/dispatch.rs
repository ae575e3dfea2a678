//! Fans frame messages out to one worker thread per stream.
//!
//! Streams are processed concurrently against one shared
//! [`FrameOrchestrator`]; messages of a single stream are handled by a single
//! worker and therefore stay in arrival order.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, warn};

use crate::error::Error;
use crate::message::{AnnotatedFrameEvent, DetectionEvent, Event, FrameMessage};
use crate::orchestrator::FrameOrchestrator;

/// Processes one message and returns its events: one detection event per
/// record, then the annotated frame when one was rendered.
pub fn handle_message(
    orchestrator: &FrameOrchestrator,
    message: &FrameMessage,
    annotate: bool,
) -> Result<Vec<Event>, Error> {
    let frame = message.decode_frame()?;
    let output = orchestrator.process_frame(&frame, &message.boxes, annotate);

    if !message.ended_tracks.is_empty() {
        orchestrator.end_tracks(&frame.stream, &message.ended_tracks);
    }

    let mut events: Vec<_> = output
        .records
        .into_iter()
        .map(|record| Event::Detection(DetectionEvent::new(message, record)))
        .collect();

    if let Some(jpeg) = output.annotated {
        events.push(Event::AnnotatedFrame(AnnotatedFrameEvent::new(message, &jpeg)));
    }

    Ok(events)
}

struct Worker {
    tx: Sender<FrameMessage>,
    handle: JoinHandle<()>,
}

pub struct Dispatcher {
    orchestrator: Arc<FrameOrchestrator>,
    annotate: bool,
    queue_capacity: usize,
    events: Sender<Event>,
    workers: HashMap<String, Worker>,
}

impl Dispatcher {
    /// Returns the dispatcher and the receiving end of its event stream. The
    /// event stream ends once [`Dispatcher::finish`] has joined every worker.
    pub fn new(
        orchestrator: Arc<FrameOrchestrator>,
        annotate: bool,
        queue_capacity: usize,
    ) -> (Self, Receiver<Event>) {
        let (events, rx) = channel::unbounded();

        let dispatcher = Self {
            orchestrator,
            annotate,
            queue_capacity: queue_capacity.max(1),
            events,
            workers: HashMap::new(),
        };

        (dispatcher, rx)
    }

    #[inline]
    pub fn streams(&self) -> usize {
        self.workers.len()
    }

    /// Queues `message` on its stream worker, starting the worker on the
    /// first message of a stream. Blocks while that worker's queue is full.
    pub fn dispatch(&mut self, message: FrameMessage) -> Result<(), Error> {
        if message.is_empty() {
            debug!(stream = %message.stream_id, frame = message.frame_number, "skipping empty frame message");
            return Ok(());
        }

        if !self.workers.contains_key(&message.stream_id) {
            let worker = self.spawn_worker(&message.stream_id)?;
            self.workers.insert(message.stream_id.clone(), worker);
        }

        let stream_id = message.stream_id.clone();
        let sent = match self.workers.get(&stream_id) {
            Some(worker) => worker.tx.send(message).is_ok(),
            None => false,
        };

        if !sent {
            self.workers.remove(&stream_id);
            return Err(Error::MalformedInput(format!(
                "worker for stream {} has stopped",
                stream_id
            )));
        }

        Ok(())
    }

    fn spawn_worker(&self, stream_id: &str) -> Result<Worker, Error> {
        let (tx, rx) = channel::bounded::<FrameMessage>(self.queue_capacity);
        let orchestrator = self.orchestrator.clone();
        let events = self.events.clone();
        let annotate = self.annotate;

        let handle = thread::Builder::new()
            .name(format!("stream-{}", stream_id))
            .spawn(move || {
                for message in rx {
                    match handle_message(&orchestrator, &message, annotate) {
                        Ok(batch) => {
                            for event in batch {
                                if events.send(event).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(err) => warn!(
                            stream = %message.stream_id,
                            frame = message.frame_number,
                            error = %err,
                            "frame message failed"
                        ),
                    }
                }
            })?;

        debug!(stream = stream_id, "started stream worker");

        Ok(Worker { tx, handle })
    }

    /// Drains every worker queue and waits for the workers to exit.
    pub fn finish(self) {
        let Self { workers, .. } = self;

        for (stream_id, worker) in workers {
            drop(worker.tx);
            if worker.handle.join().is_err() {
                warn!(stream = %stream_id, "stream worker panicked");
            }
        }
    }
}
