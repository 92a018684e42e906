//! Power-supply control.
//!
//! [`PowerSupply`] mirrors the oscilloscope facade: a checked [`Session`]
//! plus a [`PsuDialect`] resolved from `*IDN?`. Dialect startup/shutdown
//! hooks (panel lock on EA units, for instance) run inside
//! [`PowerSupply::initialize`] and [`PowerSupply::close`]; a failing hook is
//! recorded and logged rather than blocking the connection.

mod dialect;
mod vendors;

pub use dialect::{GenericPsu, PsuDialect};
pub use vendors::{AimTtiPsu, Ea9080Psu, EaPsu, RigolPsu, RohdeSchwarzPsu, TtiCpx200Dp};

use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Result, ScpiError};
use crate::identity::Identity;
use crate::registry::{resolve, DialectEntry};
use crate::session::{Session, SessionOptions};
use crate::transport::Transport;

fn make_rigol() -> Result<Box<dyn PsuDialect>> {
    Ok(Box::new(RigolPsu))
}
fn make_rohde_schwarz() -> Result<Box<dyn PsuDialect>> {
    Ok(Box::new(RohdeSchwarzPsu))
}
fn make_aim_tti() -> Result<Box<dyn PsuDialect>> {
    Ok(Box::new(AimTtiPsu))
}
fn make_cpx200dp() -> Result<Box<dyn PsuDialect>> {
    Ok(Box::new(TtiCpx200Dp))
}
fn make_ea() -> Result<Box<dyn PsuDialect>> {
    Ok(Box::new(EaPsu))
}
fn make_ea9080() -> Result<Box<dyn PsuDialect>> {
    Ok(Box::new(Ea9080Psu))
}
fn make_generic() -> Result<Box<dyn PsuDialect>> {
    Ok(Box::new(GenericPsu))
}

/// Registered power-supply dialects.
pub static PSU_DIALECTS: &[DialectEntry<dyn PsuDialect>] = &[
    DialectEntry {
        name: "tti-cpx200dp",
        priority: 2,
        model_patterns: &["CPX200DP"],
        brand_aliases: &[],
        make: make_cpx200dp,
    },
    DialectEntry {
        name: "ea-9080",
        priority: 2,
        model_patterns: &[",9080"],
        brand_aliases: &[],
        make: make_ea9080,
    },
    DialectEntry {
        name: "rigol",
        priority: 1,
        model_patterns: &[],
        brand_aliases: &["RIGOL", "RIGOL TECHNOLOGIES"],
        make: make_rigol,
    },
    DialectEntry {
        name: "rohde-schwarz",
        priority: 1,
        model_patterns: &[],
        brand_aliases: &["ROHDE", "R&S"],
        make: make_rohde_schwarz,
    },
    DialectEntry {
        name: "aim-tti",
        priority: 1,
        model_patterns: &[],
        brand_aliases: &["AIM-TTI", "TTI", "THURLBY"],
        make: make_aim_tti,
    },
    DialectEntry {
        name: "ea",
        priority: 1,
        model_patterns: &[],
        brand_aliases: &["ELEKTRO-AUTOMATIK", "EA-PS", "EA "],
        make: make_ea,
    },
];

/// Support flags collected by [`PowerSupply::probe_features`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PsuFeatures {
    /// Over-voltage protection accepted.
    pub ovp: bool,
    /// Over-current protection accepted.
    pub ocp: bool,
    /// Remote sensing accepted.
    pub sense_remote: bool,
    /// Tracking mode accepted.
    pub tracking: bool,
}

/// Brand-agnostic power-supply controller.
pub struct PowerSupply {
    session: Option<Session>,
    dialect: Option<Box<dyn PsuDialect>>,
    dialect_name: Option<&'static str>,
    identity: Option<Identity>,
    startup_ok: Option<bool>,
}

impl PowerSupply {
    /// Wrap a transport with default protocol options.
    pub fn connect(transport: Box<dyn Transport>) -> Self {
        Self::with_options(transport, SessionOptions::default())
    }

    /// Wrap a transport with explicit protocol options.
    pub fn with_options(transport: Box<dyn Transport>, options: SessionOptions) -> Self {
        PowerSupply {
            session: Some(Session::new(transport, options)),
            dialect: None,
            dialect_name: None,
            identity: None,
            startup_ok: None,
        }
    }

    /// Query `*IDN?`, resolve the dialect and run its startup hook. A hook
    /// failure is recorded in [`PowerSupply::startup_ok`] but does not fail
    /// initialization; the supply remains usable with its core commands.
    pub fn initialize(&mut self) -> Result<()> {
        if self.dialect.is_some() && self.identity.is_some() {
            return Ok(());
        }
        let session = self.session.as_mut().ok_or(ScpiError::NotConnected)?;
        let idn = session.ask("*IDN?")?.trim().to_string();
        let identity = Identity::parse(&idn);
        debug!("IDN parsed: {identity:?}");
        let resolved = resolve(PSU_DIALECTS, &idn, "generic", make_generic)?;
        info!("psu {identity} using dialect {}", resolved.name);
        match resolved.dialect.startup(session) {
            Ok(()) => self.startup_ok = Some(true),
            Err(err) => {
                warn!("startup hook failed: {err}");
                self.startup_ok = Some(false);
            }
        }
        self.dialect = Some(resolved.dialect);
        self.dialect_name = Some(resolved.name);
        self.identity = Some(identity);
        Ok(())
    }

    /// Run the shutdown hook and drop the session. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let (Some(session), Some(dialect)) = (self.session.as_mut(), self.dialect.as_deref()) {
            if let Err(err) = dialect.shutdown(session) {
                warn!("shutdown hook failed: {err}");
            }
        }
        self.session = None;
        self.dialect = None;
        self.dialect_name = None;
        self.identity = None;
        self.startup_ok = None;
    }

    /// Parsed identity, once initialized.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Name of the resolved dialect, once initialized.
    pub fn dialect_name(&self) -> Option<&'static str> {
        self.dialect_name
    }

    /// Whether the dialect startup hook ran cleanly. `None` before
    /// initialization.
    pub fn startup_ok(&self) -> Option<bool> {
        self.startup_ok
    }

    /// Change the transport timeout.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.session
            .as_mut()
            .ok_or(ScpiError::NotConnected)?
            .set_timeout(timeout)
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or(ScpiError::NotConnected)
    }

    fn parts(&mut self) -> Result<(&mut Session, &dyn PsuDialect)> {
        match (self.session.as_mut(), self.dialect.as_deref()) {
            (Some(session), Some(dialect)) => Ok((session, dialect)),
            _ => Err(ScpiError::NotConnected),
        }
    }

    // ----- core -----

    /// Program and verify a voltage setpoint.
    pub fn set_voltage(&mut self, ch: u32, volts: f64) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_voltage(s, ch, volts)
    }

    /// Program and verify a current limit.
    pub fn set_current(&mut self, ch: u32, amps: f64) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_current(s, ch, amps)
    }

    /// Raise the current limit to the rated maximum.
    pub fn set_max_current(&mut self, ch: u32) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_max_current(s, ch)
    }

    /// Toggle one channel's output.
    pub fn set_output(&mut self, ch: u32, on: bool) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_output(s, ch, on)
    }

    /// Toggle outputs on channels 1.. until one refuses; supplies with fewer
    /// channels simply stop the sweep early. Best effort by design.
    pub fn set_output_all(&mut self, on: bool) -> Result<()> {
        let (s, d) = self.parts()?;
        for ch in 1..=4 {
            if let Err(err) = d.set_output(s, ch, on) {
                debug!("output sweep stopped at channel {ch}: {err}");
                break;
            }
        }
        Ok(())
    }

    /// Queried output state; `None` when the supply has no query form.
    pub fn output_state(&mut self, ch: u32) -> Result<Option<bool>> {
        let (s, d) = self.parts()?;
        d.output_state(s, ch)
    }

    /// Master output state across the common query spellings.
    pub fn master_output_state(&mut self) -> Result<Option<bool>> {
        let (s, d) = self.parts()?;
        Ok(d.master_output_state(s))
    }

    /// Measured terminal voltage.
    pub fn measure_voltage(&mut self, ch: u32) -> Result<f64> {
        let (s, d) = self.parts()?;
        d.measure_voltage(s, ch)
    }

    /// Measured output current.
    pub fn measure_current(&mut self, ch: u32) -> Result<f64> {
        let (s, d) = self.parts()?;
        d.measure_current(s, ch)
    }

    /// Programmed voltage setpoint.
    pub fn voltage_setpoint(&mut self, ch: u32) -> Result<f64> {
        let (s, d) = self.parts()?;
        d.voltage_setpoint(s, ch)
    }

    /// Programmed current limit.
    pub fn current_setpoint(&mut self, ch: u32) -> Result<f64> {
        let (s, d) = self.parts()?;
        d.current_setpoint(s, ch)
    }

    // ----- protection and extras -----

    /// Over-voltage protection.
    pub fn set_ovp(&mut self, ch: u32, volts: f64, on: bool) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_ovp(s, ch, volts, on)
    }

    /// Over-current protection.
    pub fn set_ocp(&mut self, ch: u32, amps: f64, on: bool) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_ocp(s, ch, amps, on)
    }

    /// Remote (4-wire) sensing.
    pub fn sense_remote(&mut self, ch: u32, on: bool) -> Result<()> {
        let (s, d) = self.parts()?;
        d.sense_remote(s, ch, on)
    }

    /// Tracking mode (`INDEP`, `SERIES`, `PARALLEL`).
    pub fn tracking(&mut self, mode: &str) -> Result<()> {
        let (s, d) = self.parts()?;
        d.tracking(s, mode)
    }

    /// Try each optional feature once and report which the supply accepts.
    /// Failures are captured per feature, never raised.
    pub fn probe_features(&mut self, ch: u32) -> Result<PsuFeatures> {
        let (s, d) = self.parts()?;
        Ok(PsuFeatures {
            ovp: d.set_ovp(s, ch, 5.0, true).is_ok(),
            ocp: d.set_ocp(s, ch, 0.2, true).is_ok(),
            sense_remote: d.sense_remote(s, ch, false).is_ok(),
            tracking: d.tracking(s, "INDEP").is_ok(),
        })
    }

    // ----- raw passthrough -----

    /// Checked raw command.
    pub fn write_raw(&mut self, cmd: &str) -> Result<()> {
        self.session_mut()?.send(cmd)
    }

    /// Checked raw query.
    pub fn query_raw(&mut self, cmd: &str) -> Result<String> {
        self.session_mut()?.ask(cmd)
    }
}
