//! Rohde & Schwarz oscilloscope dialect.
//!
//! R&S scopes follow the generic command set closely; only image capture
//! goes through the hardcopy subsystem instead of a display-data block.

use crate::error::Result;
use crate::scope::dialect::ScopeDialect;
use crate::session::Session;
use crate::tokens::TokenTable;

/// Rohde & Schwarz dialect.
pub struct RohdeSchwarzScope {
    tokens: TokenTable,
}

impl RohdeSchwarzScope {
    /// Build with the base token vocabulary.
    pub fn new() -> Result<Self> {
        Ok(RohdeSchwarzScope {
            tokens: TokenTable::base()?,
        })
    }
}

impl ScopeDialect for RohdeSchwarzScope {
    fn tokens(&self) -> &TokenTable {
        &self.tokens
    }

    // Hardcopy streams the image right after IMMediate; run suspended so no
    // completion query interleaves with the binary reply.
    fn screenshot_png(&self, s: &mut Session) -> Result<Vec<u8>> {
        s.suspended(|s| {
            s.send_raw(":HCOP:DEV:LANG PNG")?;
            s.send_raw(":HCOP:IMM")?;
            s.read_raw()
        })
    }
}
