//! Per-listener timeout watchdog.
//!
//! Every accepted connection is tracked in start order. On each tick the
//! watchdog drops finished workers from the front of the queue and force-stops
//! any that have been running longer than the command timeout.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;
use uuid::Uuid;

use crate::core::{EventBus, EventKind, ServerEvent};

const RUNNING: u8 = 0;
const RESPONDING: u8 = 1;
const STOPPED: u8 = 2;
const FINISHED: u8 = 3;

/// Shared view of one connection worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub id: Uuid,
    pub peer: SocketAddr,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl WorkerHandle {
    pub fn new(peer: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::now_v7(),
            peer,
            state: AtomicU8::new(RUNNING),
            cancel: CancellationToken::new(),
        })
    }

    /// Claim the right to write the response. Fails once the worker was stopped.
    pub fn begin_response(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, RESPONDING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish(&self) {
        self.state.store(FINISHED, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.state.load(Ordering::Acquire) == FINISHED
    }

    pub fn is_stopped(&self) -> bool {
        self.state.load(Ordering::Acquire) == STOPPED
    }

    /// Stop the worker. A running worker is marked stopped and answers with a
    /// timeout; a responding worker only has its write aborted.
    pub fn stop_now(&self) {
        match self
            .state
            .compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) | Err(RESPONDING) => self.cancel.cancel(),
            Err(_) => {}
        }
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

struct Tracked {
    handle: Arc<WorkerHandle>,
    started: Instant,
}

type Queue = Arc<Mutex<VecDeque<Tracked>>>;

pub struct Watchdog {
    tracked: Queue,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Watchdog {
    /// Spawn the watchdog task for one listener.
    pub fn start(timeout: Duration, interval: Duration, events: EventBus) -> Self {
        let tracked: Queue = Arc::new(Mutex::new(VecDeque::new()));
        let cancel = CancellationToken::new();

        let task = {
            let tracked = tracked.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => sweep(&tracked, Instant::now(), timeout, &events),
                    }
                }
                debug!("Watchdog stopped");
            })
        };

        Self {
            tracked,
            cancel,
            task,
        }
    }

    pub fn track(&self, handle: Arc<WorkerHandle>) {
        self.tracker().track(handle);
    }

    /// A cloneable handle for registering workers from the accept loop.
    pub fn tracker(&self) -> Tracker {
        Tracker {
            tracked: self.tracked.clone(),
        }
    }

    pub fn tracked_count(&self) -> usize {
        lock(&self.tracked).len()
    }

    /// Stop ticking and force-stop every worker still tracked.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
        for record in lock(&self.tracked).drain(..) {
            record.handle.stop_now();
        }
    }
}

#[derive(Clone)]
pub struct Tracker {
    tracked: Queue,
}

impl Tracker {
    pub fn track(&self, handle: Arc<WorkerHandle>) {
        lock(&self.tracked).push_back(Tracked {
            handle,
            started: Instant::now(),
        });
    }
}

fn lock(queue: &Queue) -> std::sync::MutexGuard<'_, VecDeque<Tracked>> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pop records from the front while they are finished or expired.
fn sweep(tracked: &Queue, now: Instant, timeout: Duration, events: &EventBus) {
    let mut queue = lock(tracked);
    while let Some(front) = queue.front() {
        if front.handle.is_finished() {
            queue.pop_front();
            continue;
        }
        if now.saturating_duration_since(front.started) < timeout {
            break;
        }

        if let Some(record) = queue.pop_front() {
            record.handle.stop_now();
            events.notify(
                ServerEvent::new("watchdog", EventKind::Warning, "Command execution timeout")
                    .with("peer", record.handle.peer)
                    .with("worker", record.handle.id)
                    .with("timeout_ms", timeout.as_millis()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::tests::Recorder;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn queue_of(records: Vec<(Arc<WorkerHandle>, Instant)>) -> Queue {
        Arc::new(Mutex::new(
            records
                .into_iter()
                .map(|(handle, started)| Tracked { handle, started })
                .collect(),
        ))
    }

    #[test]
    fn test_stop_running_worker() {
        let handle = WorkerHandle::new(peer());
        handle.stop_now();
        assert!(handle.is_stopped());
        assert!(!handle.begin_response());
        assert!(handle.cancel.is_cancelled());
    }

    #[test]
    fn test_stop_responding_worker_only_cancels() {
        let handle = WorkerHandle::new(peer());
        assert!(handle.begin_response());
        handle.stop_now();
        assert!(!handle.is_stopped());
        assert!(handle.cancel.is_cancelled());
    }

    #[test]
    fn test_stop_finished_worker_is_noop() {
        let handle = WorkerHandle::new(peer());
        handle.finish();
        handle.stop_now();
        assert!(handle.is_finished());
        assert!(!handle.cancel.is_cancelled());
    }

    #[test]
    fn test_sweep_stops_expired_and_drops_finished() {
        let base = Instant::now();
        let timeout = Duration::from_secs(10);

        let done = WorkerHandle::new(peer());
        done.finish();
        let expired = WorkerHandle::new(peer());
        let fresh = WorkerHandle::new(peer());
        let queue = queue_of(vec![
            (done.clone(), base),
            (expired.clone(), base),
            (fresh.clone(), base + Duration::from_secs(5)),
        ]);

        let bus = EventBus::new();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(recorder.clone());

        sweep(&queue, base + Duration::from_secs(10), timeout, &bus);

        assert!(expired.is_stopped());
        assert!(!fresh.is_stopped());
        assert_eq!(lock(&queue).len(), 1);

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Warning);
        assert_eq!(events[0].message, "Command execution timeout");
    }

    #[test]
    fn test_sweep_stops_at_first_live_record() {
        let base = Instant::now();
        let young = WorkerHandle::new(peer());
        let old_but_behind = WorkerHandle::new(peer());
        // Out of order start times: the young head blocks the sweep.
        let queue = queue_of(vec![
            (young.clone(), base + Duration::from_secs(8)),
            (old_but_behind.clone(), base),
        ]);

        sweep(&queue, base + Duration::from_secs(10), Duration::from_secs(10), &EventBus::new());

        assert!(!young.is_stopped());
        assert!(!old_but_behind.is_stopped());
        assert_eq!(lock(&queue).len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_remaining_workers() {
        let watchdog = Watchdog::start(
            Duration::from_secs(60),
            Duration::from_millis(10),
            EventBus::new(),
        );
        let handle = WorkerHandle::new(peer());
        watchdog.track(handle.clone());
        assert_eq!(watchdog.tracked_count(), 1);

        tokio::time::timeout(Duration::from_secs(1), watchdog.shutdown())
            .await
            .unwrap();

        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_ticking_watchdog_evicts() {
        let watchdog = Watchdog::start(
            Duration::from_millis(50),
            Duration::from_millis(10),
            EventBus::new(),
        );
        let handle = WorkerHandle::new(peer());
        watchdog.track(handle.clone());

        tokio::time::timeout(Duration::from_secs(2), handle.cancelled())
            .await
            .unwrap();
        assert!(handle.is_stopped());
        watchdog.shutdown().await;
    }
}
