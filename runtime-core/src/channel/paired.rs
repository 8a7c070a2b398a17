use super::Channel;
use crate::delegate::Delegate;
use crate::Result;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::debug;

/// One half of an in-process loopback pair
///
/// Sending on one half delivers to the other half's `on_message` from a
/// dedicated delivery task, never on the caller's stack. Each half keeps
/// its own queue, so messages arrive in send order.
pub struct PairedChannel {
    outbound: mpsc::UnboundedSender<String>,
    on_message: Delegate<String>,
}

impl PairedChannel {
    /// Create two linked halves
    ///
    /// Must be called within a Tokio runtime.
    pub fn pair() -> (Arc<PairedChannel>, Arc<PairedChannel>) {
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();

        let local = Arc::new(PairedChannel {
            outbound: local_tx,
            on_message: Delegate::new(),
        });
        let remote = Arc::new(PairedChannel {
            outbound: remote_tx,
            on_message: Delegate::new(),
        });

        tokio::spawn(deliver(local_rx, Arc::downgrade(&remote)));
        tokio::spawn(deliver(remote_rx, Arc::downgrade(&local)));

        (local, remote)
    }
}

async fn deliver(mut queue: mpsc::UnboundedReceiver<String>, target: Weak<PairedChannel>) {
    while let Some(message) = queue.recv().await {
        match target.upgrade() {
            Some(target) => target.on_message.broadcast(&message),
            None => {
                debug!("Paired channel partner dropped, discarding message");
                break;
            }
        }
    }
}

impl Channel for PairedChannel {
    fn send(&self, message: &str) -> Result<()> {
        if self.outbound.send(message.to_string()).is_err() {
            debug!("Paired channel partner gone, message discarded");
        }
        Ok(())
    }

    fn close(&self, _code: u16, _reason: &str) {}

    fn on_message(&self) -> &Delegate<String> {
        &self.on_message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_delivers_to_other_half_in_order() {
        let (local, remote) = PairedChannel::pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        remote.on_message().add(move |m| {
            let _ = tx.send(m.clone());
        });

        for i in 0..5 {
            local.send(&format!("m{}", i)).unwrap();
        }

        for i in 0..5 {
            let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got, format!("m{}", i));
        }
    }

    #[tokio::test]
    async fn test_delivery_is_never_synchronous() {
        let (local, remote) = PairedChannel::pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        remote.on_message().add(move |m| sink.lock().push(m.clone()));

        local.send("hello").unwrap();
        assert!(seen.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock(), vec!["hello".to_string()]);
        assert!(local.on_message().is_empty());
    }

    #[tokio::test]
    async fn test_send_after_partner_dropped_is_harmless() {
        let (local, remote) = PairedChannel::pair();
        drop(remote);
        tokio::task::yield_now().await;
        assert!(local.send("anyone?").is_ok());
        local.close(1000, "done");
    }
}
