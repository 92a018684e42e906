//! Power-supply dialect trait.
//!
//! Setters verify their effect: voltage and current writes are read back and
//! compared against the request, output toggles are confirmed through the
//! state query when one is accepted. A supply that silently ignores a
//! setpoint therefore fails loudly instead of drifting.

use log::debug;

use crate::error::{Result, ScpiError};
use crate::parse;
use crate::session::Session;

/// Setpoint readback tolerance in volts/amps.
const SETPOINT_TOL: f64 = 0.01;

pub(crate) fn ensure_channel(ch: u32) -> Result<()> {
    if ch < 1 {
        return Err(ScpiError::Channel("channels are 1-based".into()));
    }
    Ok(())
}

/// Common selection cascade: `INST:NSEL n`, falling back to `INST:SEL CHn`.
pub(crate) fn select_nsel_sel(s: &mut Session, ch: u32) -> Result<()> {
    ensure_channel(ch)?;
    match s.send(&format!("INST:NSEL {ch}")) {
        Ok(()) => Ok(()),
        Err(err) => {
            debug!("INST:NSEL {ch} refused ({err}), trying INST:SEL");
            s.send(&format!("INST:SEL CH{ch}"))
        }
    }
}

/// Shared output toggle: `OUTP` on the selected channel, falling back to the
/// channel-qualified form, then verified through the dialect's state query.
pub(crate) fn output_select_then_verify<D: PsuDialect + ?Sized>(
    d: &D,
    s: &mut Session,
    ch: u32,
    on: bool,
) -> Result<()> {
    d.select_channel(s, ch)?;
    if let Err(err) = s.send(&format!("OUTP {}", parse::bstr(on))) {
        debug!("plain OUTP refused ({err}), trying channel-qualified form");
        s.send(&format!("OUTP CH{ch},{}", parse::bstr(on)))?;
    }
    verify_output(d, s, ch, on)
}

/// Compare the queried output state against the requested one. A supply
/// without a state query passes; a confirmed mismatch is an instrument fault.
pub(crate) fn verify_output<D: PsuDialect + ?Sized>(
    d: &D,
    s: &mut Session,
    ch: u32,
    on: bool,
) -> Result<()> {
    if let Some(state) = d.output_state(s, ch)? {
        if state != on {
            return Err(ScpiError::Instrument {
                command: format!("OUTP {}", parse::bstr(on)),
                message: format!("channel {ch} output state readback disagrees with request"),
            });
        }
    }
    Ok(())
}

/// Vendor-specific power-supply command surface.
#[allow(unused_variables)]
pub trait PsuDialect {
    /// Hook run once after dialect resolution (panel lock, mode reset).
    fn startup(&self, s: &mut Session) -> Result<()> {
        Ok(())
    }

    /// Hook run before the connection is torn down.
    fn shutdown(&self, s: &mut Session) -> Result<()> {
        Ok(())
    }

    /// Route subsequent source commands at channel `ch`.
    fn select_channel(&self, s: &mut Session, ch: u32) -> Result<()> {
        select_nsel_sel(s, ch)
    }

    /// Program the voltage setpoint and verify the readback.
    fn set_voltage(&self, s: &mut Session, ch: u32, volts: f64) -> Result<()> {
        self.select_channel(s, ch)?;
        s.send(&format!("SOUR:VOLT {volts}"))?;
        let readback = self.voltage_setpoint(s, ch)?;
        if (readback - volts).abs() > SETPOINT_TOL {
            return Err(ScpiError::Instrument {
                command: format!("SOUR:VOLT {volts}"),
                message: format!("setpoint readback {readback} disagrees with request {volts}"),
            });
        }
        Ok(())
    }

    /// Program the current limit and verify the readback.
    fn set_current(&self, s: &mut Session, ch: u32, amps: f64) -> Result<()> {
        self.select_channel(s, ch)?;
        s.send(&format!("SOUR:CURR {amps}"))?;
        let readback = self.current_setpoint(s, ch)?;
        if (readback - amps).abs() > SETPOINT_TOL {
            return Err(ScpiError::Instrument {
                command: format!("SOUR:CURR {amps}"),
                message: format!("setpoint readback {readback} disagrees with request {amps}"),
            });
        }
        Ok(())
    }

    /// Raise the current limit to the channel's rated maximum.
    fn set_max_current(&self, s: &mut Session, ch: u32) -> Result<()> {
        self.select_channel(s, ch)?;
        s.send_first(
            &[
                "SOUR:CURR:LIM MAX".to_string(),
                "SOUR:CURR MAX".to_string(),
                "SOUR:CURR:MAX".to_string(),
                "SOUR:CURR:LIMIT MAX".to_string(),
            ],
            "max current",
        )
    }

    /// Toggle the channel output, verified where the supply can report it.
    fn set_output(&self, s: &mut Session, ch: u32, on: bool) -> Result<()> {
        output_select_then_verify(self, s, ch, on)
    }

    /// Queried output state; `None` when no query form is accepted.
    fn output_state(&self, s: &mut Session, ch: u32) -> Result<Option<bool>> {
        self.select_channel(s, ch)?;
        for q in ["OUTP?", "OUTP:STAT?"] {
            if let Ok(resp) = s.ask(q) {
                return Ok(Some(parse::boolean(&resp)));
            }
        }
        Ok(None)
    }

    /// Master (all-channel) output state across the common query spellings.
    fn master_output_state(&self, s: &mut Session) -> Option<bool> {
        for q in ["OUTP:MAST?", "OUTP:GEN?", "OUTP:STAT?", "OUTP?"] {
            if let Ok(resp) = s.ask(q) {
                return Some(parse::boolean(&resp));
            }
        }
        None
    }

    /// Measured terminal voltage.
    fn measure_voltage(&self, s: &mut Session, ch: u32) -> Result<f64> {
        self.select_channel(s, ch)?;
        parse::number(&s.ask("MEAS:VOLT?")?)
    }

    /// Measured output current.
    fn measure_current(&self, s: &mut Session, ch: u32) -> Result<f64> {
        self.select_channel(s, ch)?;
        parse::number(&s.ask("MEAS:CURR?")?)
    }

    /// Programmed voltage setpoint.
    fn voltage_setpoint(&self, s: &mut Session, ch: u32) -> Result<f64> {
        self.select_channel(s, ch)?;
        parse::number(&s.ask("SOUR:VOLT?")?)
    }

    /// Programmed current limit.
    fn current_setpoint(&self, s: &mut Session, ch: u32) -> Result<f64> {
        self.select_channel(s, ch)?;
        parse::number(&s.ask("SOUR:CURR?")?)
    }

    /// Over-voltage protection threshold and arm state.
    fn set_ovp(&self, s: &mut Session, ch: u32, volts: f64, on: bool) -> Result<()> {
        self.select_channel(s, ch)?;
        s.send(&format!("SOUR:VOLT:PROT {volts}"))?;
        s.send(&format!("SOUR:VOLT:PROT:STAT {}", parse::bstr(on)))
    }

    /// Over-current protection threshold and arm state.
    fn set_ocp(&self, s: &mut Session, ch: u32, amps: f64, on: bool) -> Result<()> {
        self.select_channel(s, ch)?;
        s.send(&format!("SOUR:CURR:PROT {amps}"))?;
        s.send(&format!("SOUR:CURR:PROT:STAT {}", parse::bstr(on)))
    }

    /// Remote (4-wire) sensing.
    fn sense_remote(&self, s: &mut Session, ch: u32, on: bool) -> Result<()> {
        self.select_channel(s, ch)?;
        s.send(&format!("SENS:REM {}", parse::bstr(on)))
    }

    /// Tracking mode for multi-channel supplies: `INDEP`, `SERIES` or
    /// `PARALLEL`.
    fn tracking(&self, s: &mut Session, mode: &str) -> Result<()> {
        s.send(&format!("OUTP:TRAC {}", mode.trim().to_uppercase()))
    }
}

/// Plain SCPI supply with no vendor quirks.
pub struct GenericPsu;

impl PsuDialect for GenericPsu {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionOptions;
    use crate::transport::Transport;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Default)]
    struct Scripted {
        replies: HashMap<String, String>,
        fail_writes: Vec<String>,
        writes: Vec<String>,
    }

    #[derive(Clone)]
    struct Shared(Rc<RefCell<Scripted>>);

    impl Transport for Shared {
        fn write(&mut self, cmd: &str) -> io::Result<()> {
            let mut t = self.0.borrow_mut();
            if t.fail_writes.iter().any(|c| c == cmd) {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"));
            }
            t.writes.push(cmd.to_string());
            Ok(())
        }

        fn query(&mut self, cmd: &str) -> io::Result<String> {
            self.0.borrow_mut().writes.push(cmd.to_string());
            match self.0.borrow().replies.get(cmd) {
                Some(resp) => Ok(resp.clone()),
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "no scripted reply")),
            }
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(2)
        }

        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }
    }

    fn session(io: Scripted) -> (Session, Shared) {
        let shared = Shared(Rc::new(RefCell::new(io)));
        let options = SessionOptions {
            check_errors: false,
            wait_opc: false,
        };
        (Session::new(Box::new(shared.clone()), options), shared)
    }

    #[test]
    fn voltage_setpoint_is_verified() {
        let mut io = Scripted::default();
        io.replies.insert("SOUR:VOLT?".into(), "5.000".into());
        let (mut s, _t) = session(io);
        GenericPsu.set_voltage(&mut s, 1, 5.0).unwrap();
    }

    #[test]
    fn setpoint_mismatch_is_instrument_fault() {
        let mut io = Scripted::default();
        io.replies.insert("SOUR:VOLT?".into(), "0.000".into());
        let (mut s, _t) = session(io);
        let err = GenericPsu.set_voltage(&mut s, 1, 5.0).unwrap_err();
        assert!(matches!(err, ScpiError::Instrument { .. }));
    }

    #[test]
    fn selection_falls_back_to_sel() {
        let mut io = Scripted::default();
        io.fail_writes.push("INST:NSEL 2".into());
        let (mut s, t) = session(io);
        GenericPsu.select_channel(&mut s, 2).unwrap();
        assert_eq!(t.0.borrow().writes, vec!["INST:SEL CH2"]);
    }

    #[test]
    fn zero_channel_is_rejected_before_io() {
        let io = Scripted::default();
        let (mut s, t) = session(io);
        let err = GenericPsu.select_channel(&mut s, 0).unwrap_err();
        assert!(matches!(err, ScpiError::Channel(_)));
        assert!(t.0.borrow().writes.is_empty());
    }

    #[test]
    fn output_toggle_falls_back_to_qualified_form() {
        let mut io = Scripted::default();
        io.fail_writes.push("OUTP ON".into());
        io.replies.insert("OUTP?".into(), "1".into());
        let (mut s, t) = session(io);
        GenericPsu.set_output(&mut s, 1, true).unwrap();
        assert!(t.0.borrow().writes.iter().any(|w| w == "OUTP CH1,ON"));
    }

    #[test]
    fn output_mismatch_is_instrument_fault() {
        let mut io = Scripted::default();
        io.replies.insert("OUTP?".into(), "0".into());
        let (mut s, _t) = session(io);
        let err = GenericPsu.set_output(&mut s, 1, true).unwrap_err();
        assert!(matches!(err, ScpiError::Instrument { .. }));
    }

    #[test]
    fn unqueryable_output_state_passes_verification() {
        let io = Scripted::default();
        let (mut s, _t) = session(io);
        GenericPsu.set_output(&mut s, 1, true).unwrap();
    }

    #[test]
    fn master_state_walks_query_spellings() {
        let mut io = Scripted::default();
        io.replies.insert("OUTP:GEN?".into(), "ON".into());
        let (mut s, _t) = session(io);
        assert_eq!(GenericPsu.master_output_state(&mut s), Some(true));
    }

    #[test]
    fn max_current_walks_the_cascade() {
        let mut io = Scripted::default();
        io.fail_writes.push("SOUR:CURR:LIM MAX".into());
        io.fail_writes.push("SOUR:CURR MAX".into());
        let (mut s, t) = session(io);
        GenericPsu.set_max_current(&mut s, 1).unwrap();
        assert!(t.0.borrow().writes.iter().any(|w| w == "SOUR:CURR:MAX"));
    }
}
