//! Hierarchical tick-wheel timers.
//!
//! One [Ticker] thread per process fires every 50 ms and fans ticks out to registered clients
//! over a pluggable [TickTransport].  Each owning thread keeps its own [TimerWheel] and drives
//! it from the messages it receives; all wheel mutation happens on that thread.  See the module
//! docs on [wheel] for the two-level geometry and the packed id layout.

mod ticker;
mod transport;
mod wheel;

pub use ticker::Ticker;
pub use transport::{TickMsg, TickTransport};
pub use wheel::{TimerCallback, TimerId, TimerWheel};
