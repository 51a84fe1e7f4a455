use crate::common::TestHost;
use calltrace::agent::batcher::{EventBatcher, TraceEvent};
use calltrace::agent::host::{AgentMessage, HostChannel};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn event(n: u32) -> TraceEvent {
    TraceEvent {
        target_id: n,
        timestamp: n as u64,
        thread_id: 1,
        depth: 1,
        message: format!("event {n}"),
    }
}

#[test]
fn test_burst_is_sent_as_one_batch() {
    let host = Arc::new(TestHost::new());
    let batcher = EventBatcher::new(host.clone(), Duration::from_millis(50)).unwrap();

    for n in 0..3 {
        batcher.emit(event(n));
    }
    thread::sleep(Duration::from_millis(500));

    let batches = host.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], vec![event(0), event(1), event(2)]);
    assert_eq!(batcher.pending(), 0);
}

#[test]
fn test_pause_longer_than_delay_splits_batches() {
    let host = Arc::new(TestHost::new());
    let batcher = EventBatcher::new(host.clone(), Duration::from_millis(50)).unwrap();

    batcher.emit(event(0));
    thread::sleep(Duration::from_millis(500));
    batcher.emit(event(1));
    thread::sleep(Duration::from_millis(500));

    assert_eq!(host.batches(), vec![vec![event(0)], vec![event(1)]]);
}

#[test]
fn test_dispose_flushes_synchronously() {
    let host = Arc::new(TestHost::new());
    let batcher = EventBatcher::new(host.clone(), Duration::from_secs(3600)).unwrap();

    batcher.emit(event(0));
    batcher.emit(event(1));
    assert!(host.batches().is_empty());
    assert_eq!(batcher.pending(), 2);

    batcher.dispose();
    assert_eq!(host.batches(), vec![vec![event(0), event(1)]]);

    // nothing queued, nothing sent
    batcher.flush();
    batcher.dispose();
    assert_eq!(host.batches().len(), 1);

    // the timer is gone, late events are dropped instead of queued
    batcher.emit(event(2));
    assert_eq!(batcher.pending(), 0);
    batcher.flush();
    assert_eq!(host.batches().len(), 1);
}

/// Host that stalls inside its first post, batches are recorded when the post completes.
#[derive(Default)]
struct SlowHost {
    stalled: AtomicBool,
    batches: Mutex<Vec<Vec<TraceEvent>>>,
}

impl HostChannel for SlowHost {
    fn post(&self, message: AgentMessage) {
        if let AgentMessage::EventsAdd { events } = message {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(300));
            }
            self.batches.lock().unwrap().push(events);
        }
    }

    fn request(&self, _: &str, _: AgentMessage) -> anyhow::Result<serde_json::Value> {
        anyhow::bail!("unexpected request")
    }
}

#[test]
fn test_explicit_flush_waits_for_timer_batch() {
    let host = Arc::new(SlowHost::default());
    let batcher = EventBatcher::new(host.clone(), Duration::from_millis(10)).unwrap();

    batcher.emit(event(0));
    // timer is now stalled inside the post of the first batch
    thread::sleep(Duration::from_millis(100));
    batcher.emit(event(1));
    batcher.flush();
    batcher.dispose();

    assert_eq!(
        host.batches.lock().unwrap().clone(),
        vec![vec![event(0)], vec![event(1)]]
    );
}
