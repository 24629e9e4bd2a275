//! The two-level tick wheel.
//!
//! The outer chain is a sorted list of nodes each covering 100 s; inside each node a sorted
//! sub-chain of 50 ms slots holds the events.  Arming a timer walks to (or creates) the outer
//! node for the target second, finds or inserts the 50 ms slot, and appends the event; expiry
//! drains every elapsed slot in order.  Far-future timers extend the outer chain with
//! placeholder nodes, so memory follows the number of distinct target spans, not the duration.
//!
//! A timer id packs three fields, high to low: outer node id (26 bits), sub-chain slot id
//! (20 bits), event id within the slot (18 bits).  Stop and restart unpack the id and walk
//! straight to the slot.  Id zero never names a real event.
//!
//! One thread owns a wheel; nothing here locks.  Callbacks run on the owning thread from inside
//! [TimerWheel::tick_expire] and must not call back into the same wheel — a callback that wants
//! a new timer queues a request to its own event loop.

use std::time::Instant;

use crate::config::{
    TIMER_ID_CHAIN_BITS, TIMER_ID_EVENT_BITS, TIMER_ID_SUBCHAIN_BITS, TIMER_INNER_SPAN_MS,
    TIMER_MAX_DURATION_MS, TIMER_OUTER_SPAN_SECS,
};
use crate::error::{Error, Result};
use crate::list::List;
use crate::logging::LM_TIMER;
use crate::timer::transport::TickMsg;

const CHAIN_MASK: u64 = (1 << TIMER_ID_CHAIN_BITS) - 1;
const SUBCHAIN_MASK: u64 = (1 << TIMER_ID_SUBCHAIN_BITS) - 1;
const EVENT_MASK: u64 = (1 << TIMER_ID_EVENT_BITS) - 1;
const OUTER_SPAN_MS: u64 = TIMER_OUTER_SPAN_SECS * 1000;

/// Opaque packed timer id, stable for the life of the event.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    fn pack(chain: u32, sub: u32, event: u32) -> TimerId {
        TimerId(
            (chain as u64 & CHAIN_MASK) << (TIMER_ID_SUBCHAIN_BITS + TIMER_ID_EVENT_BITS)
                | (sub as u64 & SUBCHAIN_MASK) << TIMER_ID_EVENT_BITS
                | (event as u64 & EVENT_MASK),
        )
    }

    fn chain_id(self) -> u32 {
        ((self.0 >> (TIMER_ID_SUBCHAIN_BITS + TIMER_ID_EVENT_BITS)) & CHAIN_MASK) as u32
    }

    fn sub_id(self) -> u32 {
        ((self.0 >> TIMER_ID_EVENT_BITS) & SUBCHAIN_MASK) as u32
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Callback type: runs on the owning thread with the id and the event's data.
pub type TimerCallback<D> = Box<dyn FnMut(TimerId, &mut D)>;

struct Event<D> {
    id: TimerId,
    /// The caller's requested duration, kept for restart and periodic re-arm.
    requested_ms: u64,
    periodic: bool,
    cb: Option<TimerCallback<D>>,
    data: D,
}

struct SubNode<D> {
    /// Slot start, milliseconds from the owning outer node's start.  Always a multiple of the
    /// inner span.
    time_ms: u64,
    node_id: u32,
    /// Monotonic per slot; never reused, so stopped events cannot alias later ones.
    event_seq: u32,
    events: List<Event<D>>,
}

struct ChainNode<D> {
    /// Node start, whole seconds on the wheel clock.
    time_sec: u64,
    node_id: u32,
    subs: List<SubNode<D>>,
}

/// A single-owner timer wheel.  Drive it with the messages from the registered transport.
pub struct TimerWheel<D> {
    base: Instant,
    chain: List<ChainNode<D>>,
    next_chain_id: u32,
    default_cb: Option<TimerCallback<D>>,
    ready: bool,
    tick_interval_ms: u64,
}

impl<D> TimerWheel<D> {
    /// `default_cb` fires for events armed without their own callback.
    pub fn new(default_cb: Option<TimerCallback<D>>) -> TimerWheel<D> {
        TimerWheel {
            base: Instant::now(),
            chain: List::new(),
            next_chain_id: 1,
            default_cb,
            ready: false,
            tick_interval_ms: TIMER_INNER_SPAN_MS,
        }
    }

    /// Effective tick granularity, as acknowledged by the ticker.
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms
    }

    /// Feed one transport message: the readiness ack opens the wheel for arming, ticks expire.
    pub fn on_msg(&mut self, msg: TickMsg) -> Result<()> {
        match msg {
            TickMsg::Ready { multiple } => {
                self.tick_interval_ms = multiple as u64 * TIMER_INNER_SPAN_MS;
                self.ready = true;
                Ok(())
            }
            TickMsg::Tick => self.tick_expire(),
        }
    }

    fn now_parts(&self) -> (u64, u64) {
        let ms = self.base.elapsed().as_millis() as u64;
        (ms / 1000, ms)
    }

    fn alloc_chain_id(&mut self) -> u32 {
        let id = self.next_chain_id;
        self.next_chain_id = if (self.next_chain_id as u64) >= CHAIN_MASK {
            1
        } else {
            self.next_chain_id + 1
        };
        id
    }

    /// Arm a one-shot timer for `msec` milliseconds from now.
    pub fn start_timer(
        &mut self,
        msec: u64,
        cb: Option<TimerCallback<D>>,
        data: D,
    ) -> Result<TimerId> {
        self.arm(msec, cb, data, false)
    }

    /// Arm a periodic timer that re-arms itself for `msec` after every fire.
    pub fn start_tick(
        &mut self,
        msec: u64,
        cb: Option<TimerCallback<D>>,
        data: D,
    ) -> Result<TimerId> {
        self.arm(msec, cb, data, true)
    }

    fn arm(
        &mut self,
        msec: u64,
        cb: Option<TimerCallback<D>>,
        data: D,
        periodic: bool,
    ) -> Result<TimerId> {
        if !self.ready {
            return Err(Error::system("timer registration not yet acknowledged"));
        }
        if msec >= TIMER_MAX_DURATION_MS {
            return Err(Error::invalid(format!(
                "duration {msec} ms at or over the 10 day limit"
            )));
        }
        self.insert_event(msec, cb, data, periodic)
    }

    fn insert_event(
        &mut self,
        msec: u64,
        cb: Option<TimerCallback<D>>,
        data: D,
        periodic: bool,
    ) -> Result<TimerId> {
        let (now_sec, now_total_ms) = self.now_parts();

        if self.chain.is_empty() {
            let node_id = self.alloc_chain_id();
            self.chain.push_back(ChainNode {
                time_sec: now_sec,
                node_id,
                subs: List::new(),
            });
        }

        let head_time = self.chain.front().expect("chain nonempty").time_sec;
        let rel = now_total_ms + msec - head_time * 1000;
        let node_k = rel / OUTER_SPAN_MS;
        let node_time = head_time + node_k * TIMER_OUTER_SPAN_SECS;
        let in_node = rel - node_k * OUTER_SPAN_MS;
        let sub_slot = in_node / TIMER_INNER_SPAN_MS;
        let sub_time = sub_slot * TIMER_INNER_SPAN_MS;
        let sub_id = sub_slot as u32 + 1;

        if self.chain.find(|n| n.time_sec == node_time).is_none() {
            let node_id = self.alloc_chain_id();
            log::debug!(
                target: LM_TIMER,
                "extending outer chain with node {node_id} at {node_time} s"
            );
            self.chain.ordered_insert(
                ChainNode {
                    time_sec: node_time,
                    node_id,
                    subs: List::new(),
                },
                |a, b| a.time_sec.cmp(&b.time_sec),
            );
        }
        let node = self
            .chain
            .find_mut(|n| n.time_sec == node_time)
            .expect("node just ensured");
        let chain_id = node.node_id;

        if node.subs.find(|s| s.time_ms == sub_time).is_none() {
            node.subs.ordered_insert(
                SubNode {
                    time_ms: sub_time,
                    node_id: sub_id,
                    event_seq: 0,
                    events: List::new(),
                },
                |a, b| a.time_ms.cmp(&b.time_ms),
            );
        }
        let sub = node
            .subs
            .find_mut(|s| s.time_ms == sub_time)
            .expect("sub just ensured");

        if (sub.event_seq as u64) >= EVENT_MASK {
            return Err(Error::invalid("event ids exhausted in sub-chain slot"));
        }
        sub.event_seq += 1;
        let id = TimerId::pack(chain_id, sub_id, sub.event_seq);
        sub.events.push_back(Event {
            id,
            requested_ms: msec,
            periodic,
            cb,
            data,
        });

        log::debug!(target: LM_TIMER, "armed timer {id} for {msec} ms");
        Ok(id)
    }

    fn take_event(&mut self, id: TimerId) -> Option<Event<D>> {
        let node = self.chain.find_mut(|n| n.node_id == id.chain_id())?;
        let sub = node.subs.find_mut(|s| s.node_id == id.sub_id())?;
        sub.events.remove_first_where(|e| e.id == id)
    }

    /// Cancel an armed timer.  Unknown ids fail without side effects.
    pub fn stop_timer(&mut self, id: TimerId) -> Result<()> {
        if id.as_u64() == 0 || self.chain.is_empty() {
            return Err(Error::invalid("stop of an id that names no event"));
        }
        match self.take_event(id) {
            Some(_) => {
                log::debug!(target: LM_TIMER, "stopped timer {id}");
                Ok(())
            }
            None => Err(Error::invalid(format!("stop of unknown timer {id}"))),
        }
    }

    /// Cancel and re-arm at the originally requested duration.  Returns the new id.
    pub fn restart_timer(&mut self, id: TimerId) -> Result<TimerId> {
        let ev = self
            .take_event(id)
            .ok_or_else(|| Error::invalid(format!("restart of unknown timer {id}")))?;
        self.insert_event(ev.requested_ms, ev.cb, ev.data, ev.periodic)
    }

    /// Dump the wheel's node layout at debug level; a no-op unless the timer target is enabled.
    pub fn log_chain(&self) {
        if !log::log_enabled!(target: LM_TIMER, log::Level::Debug) {
            return;
        }
        for node in self.chain.iter() {
            log::debug!(
                target: LM_TIMER,
                "chain node {} at {} s, {} sub-nodes",
                node.node_id,
                node.time_sec,
                node.subs.len()
            );
            for sub in node.subs.iter() {
                log::debug!(
                    target: LM_TIMER,
                    "  sub {} at +{} ms, {} events",
                    sub.node_id,
                    sub.time_ms,
                    sub.events.len()
                );
            }
        }
    }

    /// Fire everything whose slot has elapsed, oldest slot first, insertion order within a slot.
    ///
    /// A clock jump of two full outer spans or more means the owning thread stalled past any
    /// point of sensible recovery and is reported as fatal.  Anything smaller drains in order.
    pub fn tick_expire(&mut self) -> Result<()> {
        if self.chain.is_empty() {
            return Ok(());
        }
        let (now_sec, now_total_ms) = self.now_parts();

        let head_time = self.chain.front().expect("nonempty").time_sec;
        if now_sec >= head_time + 2 * TIMER_OUTER_SPAN_SECS {
            log::error!(
                target: LM_TIMER,
                "tick stalled: wheel origin {head_time} s, now {now_sec} s"
            );
            return Err(Error::system("timer wheel stalled past one full outer span"));
        }

        let mut due: Vec<Event<D>> = Vec::new();
        loop {
            let head = self.chain.front_mut().expect("nonempty");
            let head_ms = head.time_sec * 1000;

            if now_total_ms >= head_ms {
                let cutoff = ((now_total_ms - head_ms) / TIMER_INNER_SPAN_MS) * TIMER_INNER_SPAN_MS;
                while let Some(first) = head.subs.front() {
                    if first.time_ms > cutoff {
                        break;
                    }
                    let mut sub = head.subs.pop_front().expect("front exists");
                    due.append(&mut sub.events.take_all());
                }
            }

            if now_sec >= head.time_sec + TIMER_OUTER_SPAN_SECS {
                let next_time = head.time_sec + TIMER_OUTER_SPAN_SECS;
                let adjacent_next = self
                    .chain
                    .iter()
                    .nth(1)
                    .is_some_and(|n| n.time_sec == next_time);
                if adjacent_next {
                    self.chain.pop_front();
                } else {
                    // No neighbor: the head becomes the placeholder for the next span.
                    let node_id = self.alloc_chain_id();
                    let head = self.chain.front_mut().expect("nonempty");
                    head.time_sec = next_time;
                    head.node_id = node_id;
                    head.subs.clear();
                }
                continue;
            }
            break;
        }

        for mut ev in due {
            let id = ev.id;
            match ev.cb.as_mut() {
                Some(cb) => cb(id, &mut ev.data),
                None => {
                    if let Some(cb) = self.default_cb.as_mut() {
                        cb(id, &mut ev.data);
                    } else {
                        log::warn!(
                            target: LM_TIMER,
                            "timer {id} fired with no callback and no default callback"
                        );
                    }
                }
            }
            if ev.periodic {
                if let Err(e) = self.insert_event(ev.requested_ms, ev.cb, ev.data, true) {
                    log::error!(target: LM_TIMER, "re-arming periodic timer failed: {e}");
                }
            }
        }

        Ok(())
    }
}
