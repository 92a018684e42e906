//! Electronic-load control.
//!
//! The load surface is deliberately small: the operating mode (CC, CV, CP)
//! is implied by whichever setter was used last, matching how bench loads
//! actually behave. [`ElectronicLoad`] mirrors the power-supply facade.

use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Result, ScpiError};
use crate::identity::Identity;
use crate::parse;
use crate::registry::{resolve, DialectEntry};
use crate::session::{Session, SessionOptions};
use crate::transport::Transport;

/// Vendor-specific electronic-load command surface.
#[allow(unused_variables)]
pub trait EloadDialect {
    /// Hook run once after dialect resolution.
    fn startup(&self, s: &mut Session) -> Result<()> {
        Ok(())
    }

    /// Hook run before the connection is torn down.
    fn shutdown(&self, s: &mut Session) -> Result<()> {
        Ok(())
    }

    /// Route subsequent source commands at channel `ch`. Most loads are
    /// single-channel; the default still tries the multi-channel cascade.
    fn select_channel(&self, s: &mut Session, ch: u32) -> Result<()> {
        if ch < 1 {
            return Err(ScpiError::Channel("channels are 1-based".into()));
        }
        match s.send(&format!("INST:NSEL {ch}")) {
            Ok(()) => Ok(()),
            Err(err) => {
                debug!("INST:NSEL {ch} refused ({err}), trying INST:SEL");
                s.send(&format!("INST:SEL CH{ch}"))
            }
        }
    }

    /// Constant-current setpoint.
    fn set_current(&self, s: &mut Session, ch: u32, amps: f64) -> Result<()> {
        self.select_channel(s, ch)?;
        s.send(&format!("SOUR:CURR {amps}"))
    }

    /// Constant-voltage setpoint.
    fn set_voltage(&self, s: &mut Session, ch: u32, volts: f64) -> Result<()> {
        self.select_channel(s, ch)?;
        s.send(&format!("SOUR:VOLT {volts}"))
    }

    /// Constant-power setpoint.
    fn set_power(&self, s: &mut Session, ch: u32, watts: f64) -> Result<()> {
        self.select_channel(s, ch)?;
        s.send(&format!("SOUR:POW {watts}"))
    }

    /// Toggle the load input. `INP` is the common spelling, `LOAD:STAT` the
    /// older one; the result is confirmed through `INP?` when the load
    /// answers it, and a confirmed mismatch is an instrument fault.
    fn set_input(&self, s: &mut Session, ch: u32, on: bool) -> Result<()> {
        self.select_channel(s, ch)?;
        if let Err(err) = s.send(&format!("INP {}", parse::bstr(on))) {
            debug!("INP refused ({err}), trying LOAD:STAT");
            s.send(&format!("LOAD:STAT {}", parse::bstr(on)))?;
        }
        match s.ask("INP?") {
            Ok(state) => {
                if parse::boolean(&state) != on {
                    return Err(ScpiError::Instrument {
                        command: format!("INP {}", parse::bstr(on)),
                        message: format!("input state readback disagrees with request on channel {ch}"),
                    });
                }
                Ok(())
            }
            Err(err) => {
                debug!("input state not queryable ({err})");
                Ok(())
            }
        }
    }

    /// Measured sink current.
    fn current(&self, s: &mut Session, ch: u32) -> Result<f64> {
        self.select_channel(s, ch)?;
        parse::number(&s.ask("MEAS:CURR?")?)
    }

    /// Measured terminal voltage.
    fn voltage(&self, s: &mut Session, ch: u32) -> Result<f64> {
        self.select_channel(s, ch)?;
        parse::number(&s.ask("MEAS:VOLT?")?)
    }

    /// Measured dissipated power.
    fn power(&self, s: &mut Session, ch: u32) -> Result<f64> {
        self.select_channel(s, ch)?;
        parse::number(&s.ask("MEAS:POW?")?)
    }
}

/// Plain-SCPI fallback load.
pub struct GenericEload;

impl EloadDialect for GenericEload {}

/// EA Elektro-Automatik EL series. Locks the front panel while remote.
pub struct EaEload;

impl EloadDialect for EaEload {
    fn startup(&self, s: &mut Session) -> Result<()> {
        s.send("SYST:LOCK 1")
    }

    fn shutdown(&self, s: &mut Session) -> Result<()> {
        s.send("SYST:LOCK 0")
    }
}

/// EA EL 9000 family. Single channel, and `*OPC?` gating stalls its
/// firmware, so the startup hook turns completion waits off.
pub struct EaEl9000;

impl EloadDialect for EaEl9000 {
    fn startup(&self, s: &mut Session) -> Result<()> {
        s.wait_opc = false;
        s.send("SYST:LOCK 1")
    }

    fn shutdown(&self, s: &mut Session) -> Result<()> {
        s.send("SYST:LOCK 0")
    }

    fn select_channel(&self, s: &mut Session, ch: u32) -> Result<()> {
        let _ = s;
        if ch != 1 {
            return Err(ScpiError::Channel("single-channel electronic load".into()));
        }
        Ok(())
    }
}

fn make_ea() -> Result<Box<dyn EloadDialect>> {
    Ok(Box::new(EaEload))
}
fn make_ea_el9000() -> Result<Box<dyn EloadDialect>> {
    Ok(Box::new(EaEl9000))
}
fn make_generic() -> Result<Box<dyn EloadDialect>> {
    Ok(Box::new(GenericEload))
}

/// Registered electronic-load dialects.
pub static ELOAD_DIALECTS: &[DialectEntry<dyn EloadDialect>] = &[
    DialectEntry {
        name: "ea-el9000",
        priority: 2,
        model_patterns: &["EL9\\d\\d\\d"],
        brand_aliases: &[],
        make: make_ea_el9000,
    },
    DialectEntry {
        name: "ea",
        priority: 1,
        model_patterns: &[],
        brand_aliases: &["ELEKTRO-AUTOMATIK", "EA-EL", "EA "],
        make: make_ea,
    },
];

/// Brand-agnostic electronic-load controller.
pub struct ElectronicLoad {
    session: Option<Session>,
    dialect: Option<Box<dyn EloadDialect>>,
    dialect_name: Option<&'static str>,
    identity: Option<Identity>,
    startup_ok: Option<bool>,
}

impl ElectronicLoad {
    /// Wrap a transport with default protocol options.
    pub fn connect(transport: Box<dyn Transport>) -> Self {
        Self::with_options(transport, SessionOptions::default())
    }

    /// Wrap a transport with explicit protocol options.
    pub fn with_options(transport: Box<dyn Transport>, options: SessionOptions) -> Self {
        ElectronicLoad {
            session: Some(Session::new(transport, options)),
            dialect: None,
            dialect_name: None,
            identity: None,
            startup_ok: None,
        }
    }

    /// Query `*IDN?`, resolve the dialect and run its startup hook. As with
    /// the power supply, a failing hook is logged and flagged, not raised.
    pub fn initialize(&mut self) -> Result<()> {
        if self.dialect.is_some() && self.identity.is_some() {
            return Ok(());
        }
        let session = self.session.as_mut().ok_or(ScpiError::NotConnected)?;
        let idn = session.ask("*IDN?")?.trim().to_string();
        let identity = Identity::parse(&idn);
        let resolved = resolve(ELOAD_DIALECTS, &idn, "generic", make_generic)?;
        info!("eload {identity} using dialect {}", resolved.name);
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

    /// Whether the dialect startup hook ran cleanly.
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

    fn parts(&mut self) -> Result<(&mut Session, &dyn EloadDialect)> {
        match (self.session.as_mut(), self.dialect.as_deref()) {
            (Some(session), Some(dialect)) => Ok((session, dialect)),
            _ => Err(ScpiError::NotConnected),
        }
    }

    /// Constant-current mode setpoint.
    pub fn set_current(&mut self, ch: u32, amps: f64) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_current(s, ch, amps)
    }

    /// Constant-voltage mode setpoint.
    pub fn set_voltage(&mut self, ch: u32, volts: f64) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_voltage(s, ch, volts)
    }

    /// Constant-power mode setpoint.
    pub fn set_power(&mut self, ch: u32, watts: f64) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_power(s, ch, watts)
    }

    /// Toggle the load input.
    pub fn set_input(&mut self, ch: u32, on: bool) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_input(s, ch, on)
    }

    /// Measured sink current.
    pub fn current(&mut self, ch: u32) -> Result<f64> {
        let (s, d) = self.parts()?;
        d.current(s, ch)
    }

    /// Measured terminal voltage.
    pub fn voltage(&mut self, ch: u32) -> Result<f64> {
        let (s, d) = self.parts()?;
        d.voltage(s, ch)
    }

    /// Measured dissipated power.
    pub fn power(&mut self, ch: u32) -> Result<f64> {
        let (s, d) = self.parts()?;
        d.power(s, ch)
    }

    /// Checked raw command.
    pub fn write_raw(&mut self, cmd: &str) -> Result<()> {
        self.session_mut()?.send(cmd)
    }

    /// Checked raw query.
    pub fn query_raw(&mut self, cmd: &str) -> Result<String> {
        self.session_mut()?.ask(cmd)
    }
}
