use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};

use crate::logging::LM_TRANSPORT;

/// Messages the ticker delivers to a registered client.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TickMsg {
    /// Registration acknowledged; the client's wheel may start accepting timers.  Carries the
    /// effective tick multiple back to the client.
    Ready { multiple: u32 },

    /// One tick elapsed.  No payload; the receiving wheel reads the clock itself.
    Tick,
}

/// How ticks reach the owning thread.
///
/// The channel flavor is the production path.  The callback flavor exists so tests and embedded
/// setups can couple a wheel to a tick source in-process, without the ticker thread at all.
#[derive(Clone)]
pub enum TickTransport {
    Channel(Sender<TickMsg>),
    Callback(Arc<dyn Fn(TickMsg) + Send + Sync>),
}

impl TickTransport {
    /// An unbounded channel pair: hand the transport to the ticker, keep the receiver on the
    /// owning thread.
    pub fn channel() -> (TickTransport, Receiver<TickMsg>) {
        let (tx, rx) = channel::unbounded();
        (TickTransport::Channel(tx), rx)
    }

    /// Deliver one message.  False means the client is gone (its channel closed); the ticker
    /// prunes the registration when it sees that.
    pub(crate) fn deliver(&self, msg: TickMsg) -> bool {
        match self {
            TickTransport::Channel(tx) => {
                if tx.send(msg).is_err() {
                    log::debug!(target: LM_TRANSPORT, "tick delivery to a closed channel");
                    return false;
                }
                true
            }
            TickTransport::Callback(f) => {
                f(msg);
                true
            }
        }
    }
}

impl std::fmt::Debug for TickTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickTransport::Channel(_) => f.write_str("TickTransport::Channel"),
            TickTransport::Callback(_) => f.write_str("TickTransport::Callback"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn channel_transport_delivers() {
        let (t, rx) = TickTransport::channel();
        t.deliver(TickMsg::Ready { multiple: 2 });
        t.deliver(TickMsg::Tick);
        assert_eq!(rx.recv().unwrap(), TickMsg::Ready { multiple: 2 });
        assert_eq!(rx.recv().unwrap(), TickMsg::Tick);
    }

    #[test]
    fn callback_transport_invokes() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let t = TickTransport::Callback(Arc::new(move |_msg| {
            h.fetch_add(1, Ordering::Relaxed);
        }));
        t.deliver(TickMsg::Tick);
        t.deliver(TickMsg::Tick);
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn closed_channel_does_not_panic() {
        let (t, rx) = TickTransport::channel();
        drop(rx);
        t.deliver(TickMsg::Tick);
    }
}
