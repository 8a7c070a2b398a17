use super::Channel;
use crate::delegate::{Delegate, DelegateHandle};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Keep-alive token written to the inner channel; not JSON
pub const HEARTBEAT_MESSAGE: &str = "HEARTBEAT";

enum TimerCommand {
    Reset,
    Stop,
}

/// Channel decorator that emits [`HEARTBEAT_MESSAGE`] whenever the line has
/// been idle for one cadence
///
/// Every `send` restarts the idle timer. The timer runs in its own task and
/// all resets and stops are messages to that task, so `send`, `stop` and
/// `close` are safe to call from any thread. Heartbeats received from the
/// peer are swallowed rather than surfaced to `on_message`.
pub struct HeartbeatChannel {
    inner: Arc<dyn Channel>,
    timer: mpsc::UnboundedSender<TimerCommand>,
    stopped: AtomicBool,
    on_message: Delegate<String>,
    inner_subscription: DelegateHandle,
}

impl HeartbeatChannel {
    /// Wrap `inner` and start the idle timer
    ///
    /// Must be called within a Tokio runtime.
    pub fn wrap(inner: Arc<dyn Channel>, cadence: Duration) -> Arc<Self> {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_timer(Arc::clone(&inner), cadence, timer_rx));

        Arc::new_cyclic(|weak: &Weak<HeartbeatChannel>| {
            let weak = weak.clone();
            let inner_subscription = inner.on_message().add(move |message: &String| {
                if message == HEARTBEAT_MESSAGE {
                    debug!("Heartbeat received");
                    return;
                }
                if let Some(channel) = weak.upgrade() {
                    channel.on_message.broadcast(message);
                }
            });

            HeartbeatChannel {
                inner,
                timer: timer_tx,
                stopped: AtomicBool::new(false),
                on_message: Delegate::new(),
                inner_subscription,
            }
        })
    }

    /// Cancel the timer without closing the inner channel
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.timer.send(TimerCommand::Stop);
        }
    }

    /// The wrapped channel
    pub fn inner(&self) -> &Arc<dyn Channel> {
        &self.inner
    }
}

async fn run_timer(
    inner: Arc<dyn Channel>,
    cadence: Duration,
    mut commands: mpsc::UnboundedReceiver<TimerCommand>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(cadence) => {
                if let Err(e) = inner.send(HEARTBEAT_MESSAGE) {
                    warn!("Failed to send heartbeat: {}", e);
                }
            }
            command = commands.recv() => match command {
                Some(TimerCommand::Reset) => continue,
                Some(TimerCommand::Stop) | None => break,
            }
        }
    }
    debug!("Heartbeat timer stopped");
}

impl Channel for HeartbeatChannel {
    fn send(&self, message: &str) -> Result<()> {
        self.inner.send(message)?;
        if !self.stopped.load(Ordering::SeqCst) {
            let _ = self.timer.send(TimerCommand::Reset);
        }
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        self.stop();
        self.inner.close(code, reason);
    }

    fn on_message(&self) -> &Delegate<String> {
        &self.on_message
    }
}

impl Drop for HeartbeatChannel {
    fn drop(&mut self) {
        self.inner.on_message().remove(self.inner_subscription);
    }
}
