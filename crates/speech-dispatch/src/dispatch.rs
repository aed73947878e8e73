//! Dispatcher worker: queue auto-advance + synchronous interruption.
//!
//! Runs on its own thread, multiplexing three sources with `select!`:
//! caller commands, the active synthesis stream, and engine notifications.
//! All queue and engine mutations happen on this one thread, which is what
//! upholds the "at most one item processing" invariant without extra locking.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, never, select, unbounded};

use speech_player::engine::{EngineEvent, PlayerEngine};
use speech_types::{ItemStatus, Priority, QueueItem, SynthesisEvent};

use crate::events::EventBus;
use crate::history::{HistoryLog, HistoryStatus};
use crate::queue::{QueueError, SpeechQueue};
use crate::transport::SynthesisTransport;

/// Dispatcher tuning.
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Delay between stopping a preempted stream and starting the next
    /// request, letting the device fully release the prior stream before any
    /// new chunk is appended.
    pub settle: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(50),
        }
    }
}

/// Commands accepted by the dispatcher thread.
#[derive(Debug)]
pub enum DispatchCommand {
    Enqueue { text: String, priority: Priority },
    /// Preempt whatever is playing and speak `text` next.
    Interrupt { text: String },
    /// Stop playback; the active item returns to pending.
    Stop,
    Pause,
    Resume,
    SetVolume(f32),
    Shutdown,
}

/// Handle for sending commands to the dispatcher thread.
#[derive(Clone)]
pub struct DispatcherHandle {
    cmd_tx: Sender<DispatchCommand>,
}

impl DispatcherHandle {
    pub fn enqueue(&self, text: impl Into<String>, priority: Priority) {
        let _ = self.cmd_tx.send(DispatchCommand::Enqueue {
            text: text.into(),
            priority,
        });
    }

    pub fn interrupt(&self, text: impl Into<String>) {
        let _ = self
            .cmd_tx
            .send(DispatchCommand::Interrupt { text: text.into() });
    }

    pub fn stop(&self) {
        let _ = self.cmd_tx.send(DispatchCommand::Stop);
    }

    pub fn pause(&self) {
        let _ = self.cmd_tx.send(DispatchCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.cmd_tx.send(DispatchCommand::Resume);
    }

    pub fn set_volume(&self, level: f32) {
        let _ = self.cmd_tx.send(DispatchCommand::SetVolume(level));
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(DispatchCommand::Shutdown);
    }
}

enum DispatchOutcome {
    Started,
    Empty,
    Failed,
}

struct ActiveStream {
    item_id: String,
    rx: Receiver<SynthesisEvent>,
    /// The stream delivered its terminal `done` frame; completion now waits
    /// only on the engine draining.
    stream_done: bool,
}

/// Queue/engine coordinator. Owns the queue, the history log and the active
/// stream; the surrounding thread feeds it events.
pub struct Dispatcher<T: SynthesisTransport> {
    queue: SpeechQueue,
    engine: PlayerEngine,
    transport: T,
    bus: EventBus,
    history: HistoryLog,
    config: DispatchConfig,
    active: Option<ActiveStream>,
}

impl<T: SynthesisTransport> Dispatcher<T> {
    pub fn new(
        engine: PlayerEngine,
        transport: T,
        queue: SpeechQueue,
        bus: EventBus,
        config: DispatchConfig,
    ) -> Self {
        Self {
            queue,
            engine,
            transport,
            bus,
            history: HistoryLog::new(),
            config,
            active: None,
        }
    }

    pub fn queue(&self) -> &SpeechQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut SpeechQueue {
        &mut self.queue
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn engine(&self) -> &PlayerEngine {
        &self.engine
    }

    /// Add an utterance; starts it immediately when nothing is in flight.
    pub fn enqueue(&mut self, text: &str, priority: Priority) -> Result<QueueItem, QueueError> {
        let item = self.queue.add(text, priority)?;
        self.bus.queue_changed();
        if self.active.is_none() {
            self.advance();
        }
        Ok(item)
    }

    /// Preempt the current utterance with an urgent one.
    ///
    /// Protocol order matters: the engine is stopped synchronously first,
    /// then a settle delay lets the device release the prior stream, and only
    /// then does the new request start. This prevents a trailing buffer of
    /// the old stream being scheduled after the new stream begins appending.
    pub fn interrupt(&mut self, text: &str) -> Result<QueueItem, QueueError> {
        self.engine.stop();
        thread::sleep(self.config.settle);

        if let Some(active) = self.active.take() {
            tracing::debug!(id = %active.item_id, "utterance preempted");
            self.queue.update_status(&active.item_id, ItemStatus::Pending);
            self.bus.queue_changed();
        }

        match self.queue.add(text, Priority::High) {
            Ok(item) => {
                self.bus.queue_changed();
                self.advance();
                Ok(item)
            }
            Err(e) => {
                // Nothing urgent to speak after all; resume the requeued work.
                self.advance();
                Err(e)
            }
        }
    }

    /// Stop playback and return the active item to pending.
    ///
    /// Does not auto-redispatch; the next enqueue (or interrupt) resumes work.
    pub fn stop(&mut self) {
        self.engine.stop();
        if let Some(active) = self.active.take() {
            self.queue.update_status(&active.item_id, ItemStatus::Pending);
            self.bus.queue_changed();
        }
    }

    /// Handle one frame from the active synthesis stream.
    pub fn on_stream_event(&mut self, event: SynthesisEvent) {
        if self.active.is_none() {
            return;
        }
        match event {
            SynthesisEvent::Chunk { data } => {
                if let Err(e) = self.engine.append_chunk(&data) {
                    // Terminal for this utterance: the stream is abandoned,
                    // not retried.
                    tracing::warn!(error = %e, "chunk rejected, abandoning stream");
                    self.abort_active(e.to_string());
                }
            }
            SynthesisEvent::Done => {
                if let Some(active) = self.active.as_mut() {
                    active.stream_done = true;
                }
                // A zero-chunk or already-drained stream completes right away;
                // otherwise the engine's drain event finalizes the item.
                if self.engine.stats().is_idle() {
                    self.finish_active();
                }
            }
            SynthesisEvent::Error { error } => {
                tracing::warn!(error = %error, "synthesis stream failed");
                self.abort_active(error);
            }
        }
    }

    /// Handle an engine notification.
    pub fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Completed => {
                let stream_done = self.active.as_ref().map(|a| a.stream_done).unwrap_or(false);
                if stream_done {
                    self.finish_active();
                }
                // Otherwise the engine drained mid-stream (producer starved);
                // playback resumes automatically with the next chunk.
            }
            EngineEvent::Error(message) => {
                self.bus.playback_error(&message);
                self.abort_active(message);
            }
        }
    }

    /// Keep dispatching until something starts or the queue runs dry.
    fn advance(&mut self) {
        loop {
            match self.dispatch_next() {
                DispatchOutcome::Failed => continue,
                DispatchOutcome::Started | DispatchOutcome::Empty => break,
            }
        }
    }

    /// Mark the first pending item processing and request its synthesis.
    fn dispatch_next(&mut self) -> DispatchOutcome {
        let Some(item) = self.queue.get_next().cloned() else {
            return DispatchOutcome::Empty;
        };

        self.queue.update_status(&item.id, ItemStatus::Processing);
        self.bus.queue_changed();
        self.history.record(&item.id, &item.text);

        match self.transport.request(&item) {
            Ok(rx) => {
                tracing::debug!(id = %item.id, priority = ?item.priority, "utterance dispatched");
                self.active = Some(ActiveStream {
                    item_id: item.id.clone(),
                    rx,
                    stream_done: false,
                });
                self.bus.item_started(&item.id);
                DispatchOutcome::Started
            }
            Err(e) => {
                tracing::warn!(id = %item.id, error = %e, "synthesis request failed");
                self.queue.update_status(&item.id, ItemStatus::Error);
                self.history.update_status(&item.id, HistoryStatus::Error);
                self.bus.item_failed(&item.id, e.to_string());
                DispatchOutcome::Failed
            }
        }
    }

    fn finish_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.queue
            .update_status(&active.item_id, ItemStatus::Completed);
        self.history
            .update_status(&active.item_id, HistoryStatus::Completed);
        self.bus.item_completed(&active.item_id);
        self.bus.queue_changed();
        self.advance();
    }

    fn abort_active(&mut self, message: String) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.engine.stop();
        self.queue.update_status(&active.item_id, ItemStatus::Error);
        self.history
            .update_status(&active.item_id, HistoryStatus::Error);
        self.bus.item_failed(&active.item_id, &message);
        self.bus.queue_changed();
        self.advance();
    }
}

/// Spawn the dispatcher worker thread.
pub fn spawn_dispatcher<T: SynthesisTransport + 'static>(
    engine: PlayerEngine,
    transport: T,
    queue: SpeechQueue,
    bus: EventBus,
    config: DispatchConfig,
) -> (DispatcherHandle, thread::JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = unbounded();
    let engine_events = engine.subscribe();
    let join = thread::spawn(move || {
        let mut dispatcher = Dispatcher::new(engine, transport, queue, bus, config);
        dispatcher_thread_main(&mut dispatcher, cmd_rx, engine_events);
    });
    (DispatcherHandle { cmd_tx }, join)
}

/// Main event loop for the dispatcher thread.
fn dispatcher_thread_main<T: SynthesisTransport>(
    dispatcher: &mut Dispatcher<T>,
    cmd_rx: Receiver<DispatchCommand>,
    engine_events: Receiver<EngineEvent>,
) {
    loop {
        // Only poll the stream while it is still delivering; after its
        // terminal frame the channel going quiet is expected.
        let stream_rx = match dispatcher.active.as_ref() {
            Some(active) if !active.stream_done => active.rx.clone(),
            _ => never(),
        };

        select! {
            recv(cmd_rx) -> cmd => {
                let Ok(cmd) = cmd else { break };
                match cmd {
                    DispatchCommand::Enqueue { text, priority } => {
                        if let Err(e) = dispatcher.enqueue(&text, priority) {
                            tracing::warn!(error = %e, "enqueue rejected");
                        }
                    }
                    DispatchCommand::Interrupt { text } => {
                        if let Err(e) = dispatcher.interrupt(&text) {
                            tracing::warn!(error = %e, "interrupt rejected");
                        }
                    }
                    DispatchCommand::Stop => dispatcher.stop(),
                    DispatchCommand::Pause => dispatcher.engine.pause(),
                    DispatchCommand::Resume => dispatcher.engine.resume(),
                    DispatchCommand::SetVolume(level) => dispatcher.engine.set_volume(level),
                    DispatchCommand::Shutdown => {
                        dispatcher.stop();
                        break;
                    }
                }
            }
            recv(stream_rx) -> event => {
                match event {
                    Ok(event) => dispatcher.on_stream_event(event),
                    Err(_) => {
                        // Producer hung up without a terminal frame.
                        dispatcher.abort_active("synthesis stream disconnected".to_string());
                    }
                }
            }
            recv(engine_events) -> event => {
                let Ok(event) = event else { break };
                dispatcher.on_engine_event(event);
            }
        }
    }
}
