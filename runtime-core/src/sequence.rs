//! Priority-ordered startup steps with per-step timeouts
//!
//! Steps are grouped into tiers by `order`. [`SequenceManager::start`] runs
//! the lowest remaining tier; once every step of that tier has completed
//! (explicitly or by timing out) the next tier starts on its own.
//!
//! ```no_run
//! use passage_core::sequence::{SequenceManager, DEFAULT_STEP_TIMEOUT};
//!
//! # async fn example() {
//! let sequence = SequenceManager::new();
//! let handle = sequence.clone();
//! sequence.add_step(0, "directory", move || { handle.success("directory"); }, DEFAULT_STEP_TIMEOUT);
//! sequence.add_step(1, "video", || {}, DEFAULT_STEP_TIMEOUT);
//! sequence.start();
//! # }
//! ```

use crate::delegate::Delegate;
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Timeout applied when a caller has no better estimate
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5);

type StepHandler = Box<dyn FnOnce() + Send>;

struct QueuedStep {
    order: i32,
    seq: u64,
    name: String,
    handler: StepHandler,
    timeout: Duration,
}

impl PartialEq for QueuedStep {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedStep {}

impl PartialOrd for QueuedStep {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedStep {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.order, self.seq).cmp(&(other.order, other.seq))
    }
}

#[derive(Default)]
struct SequenceState {
    queue: BinaryHeap<Reverse<QueuedStep>>,
    known: HashSet<String>,
    pending: HashMap<String, JoinHandle<()>>,
    completed: HashMap<String, bool>,
    callbacks: HashMap<String, u64>,
    next_seq: u64,
}

struct SequenceInner {
    state: Mutex<SequenceState>,
    on_complete: Delegate<(String, bool)>,
}

impl Drop for SequenceInner {
    fn drop(&mut self) {
        for (_, timer) in self.state.get_mut().pending.drain() {
            timer.abort();
        }
    }
}

/// Coordinator for ordered startup steps
///
/// Cloning yields another handle to the same sequence, which is how step
/// handlers report back. Timers are Tokio tasks, so `start` must be called
/// within a Tokio runtime.
#[derive(Clone)]
pub struct SequenceManager {
    inner: Arc<SequenceInner>,
}

/// One-shot completion for a single step
///
/// Obtained in success/failure pairs from
/// [`SequenceManager::completion_callbacks`]. Once the step completes by any
/// route, both callbacks of the pair become inert.
pub struct CompletionCallback {
    manager: Weak<SequenceInner>,
    name: String,
    token: u64,
    success: bool,
}

impl CompletionCallback {
    /// Complete the step with this callback's outcome
    pub fn invoke(self) {
        let Some(inner) = self.manager.upgrade() else {
            debug!("Sequence gone, ignoring completion of {}", self.name);
            return;
        };
        let manager = SequenceManager { inner };

        let current = manager.inner.state.lock().callbacks.get(&self.name).copied();
        if current != Some(self.token) {
            debug!("Ignoring stale completion callback for {}", self.name);
            return;
        }
        manager.complete(&self.name, self.success);
    }

    pub fn step_name(&self) -> &str {
        &self.name
    }
}

impl SequenceManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SequenceInner {
                state: Mutex::new(SequenceState::default()),
                on_complete: Delegate::new(),
            }),
        }
    }

    /// Fires with `(name, success)` each time a step completes
    pub fn on_complete(&self) -> &Delegate<(String, bool)> {
        &self.inner.on_complete
    }

    /// Queue a step; rejects empty and duplicate names
    pub fn add_step<F>(&self, order: i32, name: &str, handler: F, timeout: Duration) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if name.is_empty() {
            error!("Cannot add a sequence step with an empty name");
            return false;
        }

        let mut state = self.inner.state.lock();
        if !state.known.insert(name.to_string()) {
            error!("Sequence step {} already added", name);
            return false;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Reverse(QueuedStep {
            order,
            seq,
            name: name.to_string(),
            handler: Box::new(handler),
            timeout,
        }));
        debug!("Added sequence step {} (order {})", name, order);
        true
    }

    /// Run every step of the lowest remaining tier
    pub fn start(&self) {
        let tier: Vec<(String, StepHandler)> = {
            let mut state = self.inner.state.lock();
            let order = match state.queue.peek() {
                Some(Reverse(step)) => step.order,
                None => {
                    debug!("No sequence steps left to start");
                    return;
                }
            };

            let mut tier = Vec::new();
            loop {
                match state.queue.peek() {
                    Some(Reverse(step)) if step.order == order => {}
                    _ => break,
                }
                let Some(Reverse(step)) = state.queue.pop() else {
                    break;
                };
                let timer = self.spawn_timer(step.name.clone(), step.timeout);
                state.pending.insert(step.name.clone(), timer);
                tier.push((step.name, step.handler));
            }
            tier
        };

        for (name, handler) in tier {
            info!("Starting sequence step {}", name);
            handler();
        }
    }

    fn spawn_timer(&self, name: String, timeout: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = inner.upgrade() {
                SequenceManager { inner }.handle_timeout(&name);
            }
        })
    }

    /// Record a step's outcome; starts the next tier when this one is done
    ///
    /// Returns false (and logs) for unknown or non-pending steps.
    pub fn complete(&self, name: &str, success: bool) -> bool {
        let tier_done = {
            let mut state = self.inner.state.lock();
            if !state.known.contains(name) {
                error!("Cannot complete unknown sequence step {}", name);
                return false;
            }
            let Some(timer) = state.pending.remove(name) else {
                error!("Sequence step {} is not pending", name);
                return false;
            };
            timer.abort();
            state.completed.insert(name.to_string(), success);
            state.callbacks.remove(name);
            state.pending.is_empty()
        };

        if success {
            info!("Sequence step {} succeeded", name);
        } else {
            warn!("Sequence step {} failed", name);
        }
        self.inner.on_complete.broadcast(&(name.to_string(), success));

        if tier_done {
            self.start();
        }
        true
    }

    pub fn success(&self, name: &str) -> bool {
        self.complete(name, true)
    }

    pub fn failure(&self, name: &str) -> bool {
        self.complete(name, false)
    }

    fn handle_timeout(&self, name: &str) {
        error!("Sequence step {} timed out", name);
        self.complete(name, false);
    }

    /// Success/failure callback pair for `name`
    ///
    /// `None` for unknown or completed steps, and when a pair was already
    /// handed out and not yet used.
    pub fn completion_callbacks(
        &self,
        name: &str,
    ) -> Option<(CompletionCallback, CompletionCallback)> {
        let mut state = self.inner.state.lock();
        if !state.known.contains(name) {
            error!("Cannot create callbacks for unknown sequence step {}", name);
            return None;
        }
        if state.completed.contains_key(name) {
            error!("Cannot create callbacks for completed sequence step {}", name);
            return None;
        }
        if state.callbacks.contains_key(name) {
            error!("Callbacks for sequence step {} already exist", name);
            return None;
        }

        let token = state.next_seq;
        state.next_seq += 1;
        state.callbacks.insert(name.to_string(), token);

        let make = |success| CompletionCallback {
            manager: Arc::downgrade(&self.inner),
            name: name.to_string(),
            token,
            success,
        };
        Some((make(true), make(false)))
    }

    /// Recorded outcome of `name`, false until it has completed
    pub fn succeeded(&self, name: &str) -> bool {
        let state = self.inner.state.lock();
        if let Some(&success) = state.completed.get(name) {
            return success;
        }

        if state.pending.contains_key(name) {
            warn!("Sequence step {} is still pending", name);
        } else if state.known.contains(name) {
            warn!("Sequence step {} has not started", name);
        } else {
            error!("Unknown sequence step {}", name);
        }
        false
    }

    /// True once every queued step has completed
    pub fn is_finished(&self) -> bool {
        let state = self.inner.state.lock();
        state.queue.is_empty() && state.pending.is_empty()
    }

    /// Cancel all outstanding timers
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        for timer in state.pending.values() {
            timer.abort();
        }
        state.callbacks.clear();
        debug!("Cancelled {} sequence timers", state.pending.len());
    }
}

impl Default for SequenceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_step(
        sequence: &SequenceManager,
        log: &Arc<Mutex<Vec<String>>>,
        order: i32,
        name: &'static str,
        complete: bool,
    ) {
        let log = Arc::clone(log);
        let handle = sequence.clone();
        sequence.add_step(
            order,
            name,
            move || {
                log.lock().push(name.to_string());
                if complete {
                    handle.success(name);
                }
            },
            DEFAULT_STEP_TIMEOUT,
        );
    }

    #[tokio::test]
    async fn test_rejects_empty_and_duplicate_names() {
        let sequence = SequenceManager::new();
        assert!(!sequence.add_step(0, "", || {}, DEFAULT_STEP_TIMEOUT));
        assert!(sequence.add_step(0, "a", || {}, DEFAULT_STEP_TIMEOUT));
        assert!(!sequence.add_step(3, "a", || {}, DEFAULT_STEP_TIMEOUT));
    }

    #[tokio::test]
    async fn test_whole_tier_runs_before_next() {
        let sequence = SequenceManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        log_step(&sequence, &log, 2, "late", true);
        log_step(&sequence, &log, 1, "first", false);
        log_step(&sequence, &log, 1, "second", false);

        sequence.start();
        assert_eq!(*log.lock(), vec!["first", "second"]);

        sequence.success("first");
        assert_eq!(log.lock().len(), 2);

        sequence.success("second");
        assert_eq!(*log.lock(), vec!["first", "second", "late"]);
        assert!(sequence.succeeded("late"));
        assert!(sequence.is_finished());
    }

    #[tokio::test]
    async fn test_synchronous_completion_does_not_skip_tier_members() {
        let sequence = SequenceManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        log_step(&sequence, &log, 0, "a", true);
        log_step(&sequence, &log, 0, "b", true);
        log_step(&sequence, &log, 1, "c", true);

        sequence.start();
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_step_failed_and_advances() {
        let sequence = SequenceManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        sequence
            .on_complete()
            .add(move |(name, ok)| sink.lock().push((name.clone(), *ok)));

        sequence.add_step(0, "stuck", || {}, Duration::from_secs(2));
        log_step(&sequence, &log, 1, "next", true);

        sequence.start();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(!sequence.succeeded("stuck"));
        assert_eq!(*log.lock(), vec!["next"]);
        assert_eq!(
            *outcomes.lock(),
            vec![("stuck".to_string(), false), ("next".to_string(), true)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_cancels_timer() {
        let sequence = SequenceManager::new();
        sequence.add_step(0, "quick", || {}, Duration::from_secs(1));
        sequence.start();
        assert!(sequence.success("quick"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(sequence.succeeded("quick"));
    }

    #[tokio::test]
    async fn test_bad_completions_leave_bookkeeping_intact() {
        let sequence = SequenceManager::new();
        sequence.add_step(0, "a", || {}, DEFAULT_STEP_TIMEOUT);
        sequence.add_step(0, "b", || {}, DEFAULT_STEP_TIMEOUT);
        sequence.start();

        assert!(!sequence.complete("nope", true));
        assert!(sequence.complete("a", true));
        assert!(!sequence.complete("a", false));

        assert!(sequence.succeeded("a"));
        assert!(!sequence.succeeded("b"));
        assert!(sequence.complete("b", false));
        assert!(sequence.is_finished());
    }

    #[tokio::test]
    async fn test_succeeded_before_start() {
        let sequence = SequenceManager::new();
        sequence.add_step(0, "a", || {}, DEFAULT_STEP_TIMEOUT);
        assert!(!sequence.succeeded("a"));
        assert!(!sequence.succeeded("missing"));
    }

    #[tokio::test]
    async fn test_completion_callbacks() {
        let sequence = SequenceManager::new();
        sequence.add_step(0, "load", || {}, DEFAULT_STEP_TIMEOUT);
        sequence.add_step(0, "other", || {}, DEFAULT_STEP_TIMEOUT);

        assert!(sequence.completion_callbacks("missing").is_none());
        let (on_success, on_failure) = sequence.completion_callbacks("load").unwrap();
        assert!(sequence.completion_callbacks("load").is_none());
        assert_eq!(on_success.step_name(), "load");

        sequence.start();
        on_failure.invoke();
        assert!(!sequence.succeeded("load"));

        // the pair was discarded when the step completed
        on_success.invoke();
        assert!(!sequence.succeeded("load"));
        assert!(sequence.completion_callbacks("load").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_timers() {
        let sequence = SequenceManager::new();
        sequence.add_step(0, "a", || {}, Duration::from_secs(1));
        sequence.start();
        sequence.shutdown();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!sequence.succeeded("a"));
        assert!(!sequence.is_finished());
    }
}
