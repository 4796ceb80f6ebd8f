//! The runtime event feed: a subprocess streaming lifecycle events, and the
//! bounded queue handing them to the lifecycle coordinator.
//!
//! The feed child is `docker events --format '{{json .}}' --since 0m` (or
//! the podman equivalent), one JSON record per stdout line. The feed thread
//! restarts the child with a fixed back-off whenever it dies; a broken feed
//! is never fatal to the monitor.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::Runtime;

/// Default bound of the event queue.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// A bounded, multi-producer queue of raw event lines.
///
/// Producers never block: when the queue is full the newest line is dropped
/// with a warning. Missed events are repaired by the coordinator's next
/// store-snapshot diff, so a lossy queue is preferable to a stalled feed.
pub struct EventQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
    capacity: usize,
}

struct QueueState {
    items: VecDeque<String>,
    closed: bool,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
            capacity,
        }
    }

    /// Enqueues a line; returns `false` when it was dropped because the
    /// queue is full or closed.
    pub fn push(&self, line: String) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        if state.items.len() >= self.capacity {
            log::warn!("event queue full ({} entries), dropping event", self.capacity);
            return false;
        }
        state.items.push_back(line);
        drop(state);
        self.cv.notify_one();
        true
    }

    /// Dequeues the oldest line, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout or when the queue was closed and drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<String> {
        let mut state = self.state.lock();
        if state.items.is_empty() && !state.closed {
            self.cv.wait_for(&mut state, timeout);
        }
        state.items.pop_front()
    }

    /// Closes the queue: pending items stay poppable, new pushes are
    /// rejected, and blocked consumers wake up.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.cv.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owns the event-feed thread and its current child process.
pub struct EventFeed {
    running: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl EventFeed {
    /// Spawns the feed thread.
    ///
    /// `backoff` is the pause before restarting a dead child, conventionally
    /// one event refresh interval.
    pub fn spawn(
        runtime: Runtime,
        queue: Arc<EventQueue>,
        shutdown: Arc<AtomicBool>,
        backoff: Duration,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let child = Arc::new(Mutex::new(None));

        let handle = {
            let running = Arc::clone(&running);
            let child = Arc::clone(&child);
            thread::Builder::new()
                .name("cgwatch-events".to_owned())
                .spawn(move || feed_loop(runtime, &queue, &running, &shutdown, &child, backoff))
                .expect("failed to spawn event feed thread")
        };

        Self {
            running,
            child,
            handle: Some(handle),
        }
    }

    /// Stops the feed: kills the current child to unblock the reader and
    /// joins the thread. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(child) = self.child.lock().as_mut() {
            let _ = child.kill();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("event feed thread panicked");
            }
        }
    }
}

impl Drop for EventFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

fn feed_loop(
    runtime: Runtime,
    queue: &EventQueue,
    running: &AtomicBool,
    shutdown: &AtomicBool,
    child_slot: &Mutex<Option<Child>>,
    backoff: Duration,
) {
    let live = || running.load(Ordering::SeqCst) && !shutdown.load(Ordering::SeqCst);

    while live() {
        let spawned = Command::new(runtime.command())
            .args(["events", "--format", "{{json .}}", "--since", "0m"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                log::error!("failed to start `{runtime} events`: {err}");
                thread::sleep(backoff);
                continue;
            }
        };

        let Some(stdout) = child.stdout.take() else {
            log::error!("`{runtime} events` child has no stdout");
            let _ = child.kill();
            let _ = child.wait();
            thread::sleep(backoff);
            continue;
        };
        *child_slot.lock() = Some(child);

        log::debug!("event feed attached to `{runtime} events`");
        for line in BufReader::new(stdout).lines() {
            if !live() {
                break;
            }
            match line {
                Ok(line) if !line.trim().is_empty() => {
                    queue.push(line);
                }
                Ok(_) => {}
                Err(err) => {
                    log::warn!("event feed read error: {err}");
                    break;
                }
            }
        }

        if let Some(mut child) = child_slot.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }

        if live() {
            log::warn!(
                "`{runtime} events` stream ended, restarting in {} ms",
                backoff.as_millis()
            );
            thread::sleep(backoff);
        }
    }
}
