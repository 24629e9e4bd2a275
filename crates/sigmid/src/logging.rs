//! Logging conventions for the crate.
//!
//! Everything logs through the `log` facade with a module-scoped target, so a deployment can
//! raise or lower one subsystem at a time (`RUST_LOG=sigmid::xmlp=debug` and the like) the way
//! the C middleware's per-module severity table did.  The original's eight severities collapse
//! onto the facade's five: EMERG/ALERT/CRIT/ERROR become `error`, WARNING becomes `warn`,
//! NOTICE/INFO become `info`, DEBUG stays `debug`.
//!
//! The C macros wrapped a `do { … } while(0)` block whose `continue` made them unusable outside
//! loops; there is nothing to carry over from that, the facade's macros have no such constraint.

/// Target for the slab/memory layer.
pub const LM_MEM: &str = "sigmid::mem";

/// Target for the timer wheel and ticker.
pub const LM_TIMER: &str = "sigmid::timer";

/// Target for the tick transport layer.
pub const LM_TRANSPORT: &str = "sigmid::transport";

/// Target for the XSD parser and XML validator.
pub const LM_XMLP: &str = "sigmid::xmlp";

/// Target for everything without a dedicated module.
pub const LM_ALL: &str = "sigmid";
