//! Middleware primitives for SIP/Diameter signaling nodes.
//!
//! The crate bundles the pieces a signaling node's control plane keeps rebuilding: pre-allocated
//! reference-counted memory ([premem], re-exported), pointer-length slices and cursor buffers
//! ([pl], [mbuf]), linked lists and a bucketed hash map ([list], [hash]), a hierarchical
//! tick-wheel timer with a central ticker thread ([timer]), and a streaming XSD-driven XML
//! validator ([xml]).
//!
//! Process-wide state (the slab pool, the ticker) lives in a [CoreContext]; callers that do not
//! care use [default_ctx] and never think about it again.

pub mod config;
mod context;
mod error;
pub mod hash;
pub mod list;
pub mod logging;
pub mod mbuf;
pub mod pl;
pub mod timer;
pub mod xml;

pub use context::{default_ctx, CoreContext};
pub use error::{Error, Result};
pub use mbuf::{MBuf, MBufView};
pub use pl::{Pl, VPl};

pub use premem;
