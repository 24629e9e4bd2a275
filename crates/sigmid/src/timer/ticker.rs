use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::config::{TICK_MAX_MULTIPLE, TIMER_INNER_SPAN_MS};
use crate::error::{Error, Result};
use crate::logging::LM_TIMER;
use crate::timer::transport::{TickMsg, TickTransport};

struct Client {
    multiple: u32,
    transport: TickTransport,
}

struct TickerShared {
    clients: Mutex<Vec<Client>>,
}

/// The central tick source: one background thread firing every 50 ms, fanning out to every
/// registered client whose multiple divides the tick count.
///
/// The thread holds only a weak reference; dropping the last [Ticker] handle ends it at the next
/// tick.  Registration is the only shared-state operation and takes a small mutex; delivery
/// itself never blocks on a client (channel sends are unbounded, callbacks are the client's own
/// code).
pub struct Ticker {
    shared: Arc<TickerShared>,
}

impl Ticker {
    pub fn start() -> Result<Ticker> {
        let shared = Arc::new(TickerShared {
            clients: Mutex::new(Vec::new()),
        });
        let weak = Arc::downgrade(&shared);
        std::thread::Builder::new()
            .name("sigmid-ticker".into())
            .spawn(move || ticker_main(weak))
            .map_err(|e| Error::system(format!("spawning ticker thread: {e}")))?;
        Ok(Ticker { shared })
    }

    /// Register a client firing every `multiple` ticks (1..=10, so 50 ms to 500 ms).
    ///
    /// The readiness acknowledgement is delivered through the transport before any tick, so the
    /// client's wheel refuses timers until its event loop has seen the ack.
    pub fn register(&self, multiple: u32, transport: TickTransport) -> Result<()> {
        if multiple == 0 || multiple > TICK_MAX_MULTIPLE {
            return Err(Error::invalid(format!(
                "tick multiple {multiple} outside 1..={TICK_MAX_MULTIPLE}"
            )));
        }
        transport.deliver(TickMsg::Ready { multiple });
        self.shared
            .clients
            .lock()
            .unwrap()
            .push(Client { multiple, transport });
        log::info!(target: LM_TIMER, "timer client registered with multiple {multiple}");
        Ok(())
    }

    /// Registered client count, for diagnostics.
    pub fn client_count(&self) -> usize {
        self.shared.clients.lock().unwrap().len()
    }
}

fn ticker_main(shared: Weak<TickerShared>) {
    let started = Instant::now();
    let mut tick: u64 = 0;

    log::info!(target: LM_TIMER, "ticker thread running");
    loop {
        tick += 1;
        // Deadlines come off the start instant, so a slow delivery pass shrinks the next sleep
        // instead of accumulating drift.
        let deadline = started + Duration::from_millis(TIMER_INNER_SPAN_MS * tick);
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }

        let Some(shared) = shared.upgrade() else {
            break;
        };
        let mut clients = shared.clients.lock().unwrap();
        clients.retain(|c| {
            if tick % c.multiple as u64 != 0 {
                return true;
            }
            c.transport.deliver(TickMsg::Tick)
        });
    }
    log::info!(target: LM_TIMER, "ticker thread exiting, all handles dropped");
}
