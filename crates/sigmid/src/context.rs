//! The process context: the slab pool and the ticker thread, bundled.
//!
//! Most deployments want exactly one of each for the life of the process; [default_ctx] is that
//! instance, built lazily on first touch and never torn down.  Embedders and tests that need
//! their own pool sizes construct a [CoreContext] explicitly and thread it through.

use std::sync::Arc;

use lazy_static::lazy_static;
use premem::{PreMem, PreMemConfig};

use crate::error::Result;
use crate::timer::Ticker;

pub struct CoreContext {
    premem: Arc<PreMem>,
    ticker: Ticker,
}

impl CoreContext {
    pub fn new(config: PreMemConfig) -> Result<CoreContext> {
        Ok(CoreContext {
            premem: PreMem::new(config),
            ticker: Ticker::start()?,
        })
    }

    pub fn premem(&self) -> &Arc<PreMem> {
        &self.premem
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }
}

lazy_static! {
    static ref DEFAULT_CTX: CoreContext =
        CoreContext::new(PreMemConfig::default()).expect("default core context");
}

/// The process-wide context.
pub fn default_ctx() -> &'static CoreContext {
    &DEFAULT_CTX
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbuf::MBuf;

    #[test]
    fn explicit_context() {
        let ctx = CoreContext::new(PreMemConfig::compact()).unwrap();
        let mut mb = MBuf::alloc(ctx.premem(), 16).unwrap();
        mb.write_str("ok", true).unwrap();
        assert_eq!(mb.bytes(), b"ok");
        assert_eq!(ctx.ticker().client_count(), 0);
    }
}
