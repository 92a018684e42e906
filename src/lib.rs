//! Brand-agnostic SCPI instrument control.
//!
//! The crate is split along one seam: a checked protocol engine
//! ([`Session`]) that owns every `SYST:ERR?`/`*OPC?` exchange, and per-brand
//! dialects resolved from `*IDN?` at runtime. Application code talks to the
//! facades ([`Oscilloscope`], [`PowerSupply`], [`ElectronicLoad`]) and never
//! sees which vendor quirk was applied.
//!
//! Transports are pluggable through the [`Transport`] trait, so the same
//! code runs against VISA-style message sockets, serial bridges or a
//! simulated instrument in tests.
//!
//! ```no_run
//! use labscpi::{Oscilloscope, Result};
//! # fn open_transport() -> Box<dyn labscpi::Transport> { unimplemented!() }
//!
//! fn main() -> Result<()> {
//!     let mut scope = Oscilloscope::connect(open_transport());
//!     scope.initialize()?;
//!     scope.set_channel_enabled(1, true)?;
//!     let (vdiv, offset) = scope.autoscale_channel(1)?;
//!     println!("settled at {vdiv} V/div, {offset} V offset");
//!     Ok(())
//! }
//! ```

pub mod eload;
pub mod error;
mod identity;
mod parse;
pub mod psu;
pub mod registry;
pub mod scope;
pub mod session;
pub mod tokens;
pub mod transport;

pub use eload::ElectronicLoad;
pub use error::{Result, ScpiError};
pub use identity::Identity;
pub use psu::{PowerSupply, PsuFeatures};
pub use scope::Oscilloscope;
pub use session::{Session, SessionOptions};
pub use tokens::{ChannelUnit, MathOperator, Measure, Slope, TriggerSweepMode};
pub use transport::Transport;
