//! Event batcher: accumulates trace events and ships them to the host in batches.
use crate::agent::error::Error;
use crate::agent::host::{AgentMessage, HostChannel};
use crate::agent::target::{TargetId, ThreadId};
use serde::{Serialize, Serializer};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use std::{mem, thread};

/// One line logged by a behavior, immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub target_id: TargetId,
    /// Milliseconds since session start.
    pub timestamp: u64,
    pub thread_id: ThreadId,
    pub depth: u32,
    pub message: String,
}

impl Serialize for TraceEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            self.target_id,
            self.timestamp,
            self.thread_id,
            self.depth,
            &self.message,
        )
            .serialize(serializer)
    }
}

#[derive(Default)]
struct Queue {
    events: Vec<TraceEvent>,
    /// Time of the scheduled flush, `None` if no flush is pending.
    deadline: Option<Instant>,
    shutdown: bool,
}

impl Queue {
    fn take(&mut self) -> Vec<TraceEvent> {
        self.deadline = None;
        mem::take(&mut self.events)
    }
}

struct Shared {
    host: Arc<dyn HostChannel>,
    delay: Duration,
    queue: Mutex<Queue>,
    wakeup: Condvar,
    /// Held from taking a batch until it is posted, batches reach the host in queue order.
    sending: Mutex<()>,
}

impl Shared {
    fn send(&self, events: Vec<TraceEvent>) {
        if events.is_empty() {
            return;
        }
        crate::agent_debug!(target: "batcher", "flush {} events", events.len());
        self.host.post(AgentMessage::EventsAdd { events });
    }

    fn flush(&self) {
        let _sending = self.sending.lock().unwrap();
        let events = self.queue.lock().unwrap().take();
        self.send(events);
    }

    fn run_timer(&self) {
        let mut queue = self.queue.lock().unwrap();
        loop {
            if queue.shutdown {
                return;
            }

            match queue.deadline {
                None => queue = self.wakeup.wait(queue).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now < deadline {
                        queue = self.wakeup.wait_timeout(queue, deadline - now).unwrap().0;
                    } else {
                        drop(queue);
                        self.flush();
                        queue = self.queue.lock().unwrap();
                    }
                }
            }
        }
    }
}

/// Accumulates events and flushes them after a short idle delay or on dispose.
pub struct EventBatcher {
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl EventBatcher {
    pub fn new(host: Arc<dyn HostChannel>, delay: Duration) -> Result<Self, Error> {
        let shared = Arc::new(Shared {
            host,
            delay,
            queue: Mutex::default(),
            wakeup: Condvar::new(),
            sending: Mutex::default(),
        });

        let timer_shared = shared.clone();
        let timer = thread::Builder::new()
            .name("trace-batcher".to_string())
            .spawn(move || timer_shared.run_timer())?;

        Ok(Self {
            shared,
            timer: Mutex::new(Some(timer)),
        })
    }

    /// Queue an event, schedule a flush if none is pending. Events emitted after dispose are
    /// dropped.
    pub fn emit(&self, event: TraceEvent) {
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.shutdown {
            return;
        }
        queue.events.push(event);
        if queue.deadline.is_none() {
            queue.deadline = Some(Instant::now() + self.shared.delay);
            self.shared.wakeup.notify_one();
        }
    }

    /// Send everything queued as one batch. Does nothing if the queue is empty.
    pub fn flush(&self) {
        self.shared.flush();
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().unwrap().events.len()
    }

    /// Stop the flush timer and force a final synchronous flush.
    pub fn dispose(&self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.shutdown = true;
            self.shared.wakeup.notify_one();
        }
        if let Some(timer) = self.timer.lock().unwrap().take() {
            if timer.join().is_err() {
                crate::agent_error!(target: "batcher", "flush timer thread panicked");
            }
        }
        self.shared.flush();
    }
}

impl Drop for EventBatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}
