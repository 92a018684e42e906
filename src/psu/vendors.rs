//! Vendor power-supply dialects.

use log::debug;

use crate::error::{Result, ScpiError};
use crate::parse;
use crate::psu::dialect::{
    ensure_channel, output_select_then_verify, verify_output, PsuDialect,
};
use crate::session::Session;

/// Rigol DP series. The stock command set fits; the channel-qualified output
/// form gets one extra chance before verification.
pub struct RigolPsu;

impl PsuDialect for RigolPsu {
    fn set_output(&self, s: &mut Session, ch: u32, on: bool) -> Result<()> {
        if let Err(err) = output_select_then_verify(self, s, ch, on) {
            debug!("selected-channel output failed ({err}), trying explicit form");
            s.send(&format!("OUTP CH{ch},{}", parse::bstr(on)))?;
            verify_output(self, s, ch, on)?;
        }
        Ok(())
    }
}

/// Rohde & Schwarz supplies prefer `OUTP:STAT` on the selected channel.
pub struct RohdeSchwarzPsu;

impl PsuDialect for RohdeSchwarzPsu {
    fn set_output(&self, s: &mut Session, ch: u32, on: bool) -> Result<()> {
        self.select_channel(s, ch)?;
        match s.send(&format!("OUTP:STAT {}", parse::bstr(on))) {
            Ok(()) => verify_output(self, s, ch, on),
            Err(err) => {
                debug!("OUTP:STAT refused ({err}), falling back");
                output_select_then_verify(self, s, ch, on)
            }
        }
    }
}

/// Aim-TTi bench supplies. Mostly single-output; multi-output models take
/// `INST:NSEL`, and some accept a channel-numbered `OUTP n,ON`.
pub struct AimTtiPsu;

impl PsuDialect for AimTtiPsu {
    fn select_channel(&self, s: &mut Session, ch: u32) -> Result<()> {
        ensure_channel(ch)?;
        match s.send(&format!("INST:NSEL {ch}")) {
            Ok(()) => Ok(()),
            Err(_) if ch == 1 => Ok(()),
            Err(_) => Err(ScpiError::Unsupported(
                "this Aim-TTi model does not select channels beyond 1".into(),
            )),
        }
    }

    fn set_output(&self, s: &mut Session, ch: u32, on: bool) -> Result<()> {
        match s.send(&format!("OUTP {ch},{}", parse::bstr(on))) {
            Ok(()) => verify_output(self, s, ch, on),
            Err(err) => {
                debug!("numbered OUTP refused ({err}), falling back");
                output_select_then_verify(self, s, ch, on)
            }
        }
    }
}

/// Aim-TTi CPX200DP dual supply. No channel selection; every command carries
/// the channel number (`V1 5.0`, `OP2 1`), replies echo the command name.
pub struct TtiCpx200Dp;

impl TtiCpx200Dp {
    fn check_channel(ch: u32) -> Result<()> {
        if !(1..=2).contains(&ch) {
            return Err(ScpiError::Channel("CPX200DP has channels 1-2 only".into()));
        }
        Ok(())
    }
}

impl PsuDialect for TtiCpx200Dp {
    // Validation only, the command set needs no selection step.
    fn select_channel(&self, _s: &mut Session, ch: u32) -> Result<()> {
        Self::check_channel(ch)
    }

    fn set_voltage(&self, s: &mut Session, ch: u32, volts: f64) -> Result<()> {
        Self::check_channel(ch)?;
        s.send(&format!("V{ch} {volts:.3}"))
    }

    fn set_current(&self, s: &mut Session, ch: u32, amps: f64) -> Result<()> {
        Self::check_channel(ch)?;
        s.send(&format!("I{ch} {amps:.3}"))
    }

    fn voltage_setpoint(&self, s: &mut Session, ch: u32) -> Result<f64> {
        Self::check_channel(ch)?;
        let resp = s.ask(&format!("V{ch}?"))?;
        // Reply echoes the command: "V1 5.00"
        let value = resp.trim().split_whitespace().nth(1).unwrap_or(resp.trim());
        parse::number(value)
    }

    fn current_setpoint(&self, s: &mut Session, ch: u32) -> Result<f64> {
        Self::check_channel(ch)?;
        let resp = s.ask(&format!("I{ch}?"))?;
        let value = resp.trim().split_whitespace().nth(1).unwrap_or(resp.trim());
        parse::number(value)
    }

    fn measure_voltage(&self, s: &mut Session, ch: u32) -> Result<f64> {
        Self::check_channel(ch)?;
        // Reply carries a unit suffix: "4.994V"
        let resp = s.ask(&format!("V{ch}O?"))?;
        parse::number(resp.trim().trim_end_matches(['V', 'v']))
    }

    fn measure_current(&self, s: &mut Session, ch: u32) -> Result<f64> {
        Self::check_channel(ch)?;
        let resp = s.ask(&format!("I{ch}O?"))?;
        parse::number(resp.trim().trim_end_matches(['A', 'a']))
    }

    fn set_output(&self, s: &mut Session, ch: u32, on: bool) -> Result<()> {
        Self::check_channel(ch)?;
        s.send(&format!("OP{ch} {}", u8::from(on)))?;
        verify_output(self, s, ch, on)
    }

    fn output_state(&self, s: &mut Session, ch: u32) -> Result<Option<bool>> {
        Self::check_channel(ch)?;
        match s.ask(&format!("OP{ch}?")) {
            Ok(resp) => Ok(Some(parse::boolean(&resp))),
            Err(_) => Ok(None),
        }
    }
}

/// EA Elektro-Automatik supplies, `OUTP:STAT` first.
pub struct EaPsu;

impl PsuDialect for EaPsu {
    fn set_output(&self, s: &mut Session, ch: u32, on: bool) -> Result<()> {
        self.select_channel(s, ch)?;
        match s.send(&format!("OUTP:STAT {}", parse::bstr(on))) {
            Ok(()) => verify_output(self, s, ch, on),
            Err(err) => {
                debug!("OUTP:STAT refused ({err}), falling back");
                output_select_then_verify(self, s, ch, on)
            }
        }
    }
}

/// EA PS 9080 single-output supply. Remote operation needs the front panel
/// locked, and the firmware answers `*OPC?` unreliably, so completion gating
/// is switched off for the whole session at startup.
pub struct Ea9080Psu;

impl PsuDialect for Ea9080Psu {
    fn startup(&self, s: &mut Session) -> Result<()> {
        s.wait_opc = false;
        s.send("SYST:LOCK ON")
    }

    fn shutdown(&self, s: &mut Session) -> Result<()> {
        s.send("SYST:LOCK OFF")
    }

    fn select_channel(&self, _s: &mut Session, ch: u32) -> Result<()> {
        if ch != 1 {
            return Err(ScpiError::Channel("only one channel available".into()));
        }
        Ok(())
    }

    fn set_output(&self, s: &mut Session, ch: u32, on: bool) -> Result<()> {
        if let Err(err) = output_select_then_verify(self, s, ch, on) {
            debug!("standard output toggle failed ({err}), trying bare form");
            s.send(&format!("OUTP {}", parse::bstr(on)))?;
            verify_output(self, s, ch, on)?;
        }
        Ok(())
    }
}

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
    fn cpx_setpoint_strips_command_echo() {
        let mut io = Scripted::default();
        io.replies.insert("V1?".into(), "V1 5.00".into());
        let (mut s, _t) = session(io);
        let v = TtiCpx200Dp.voltage_setpoint(&mut s, 1).unwrap();
        assert!((v - 5.0).abs() < 1e-9);
    }

    #[test]
    fn cpx_measurement_strips_unit_suffix() {
        let mut io = Scripted::default();
        io.replies.insert("V2O?".into(), "4.994V".into());
        io.replies.insert("I1O?".into(), "0.101A".into());
        let (mut s, _t) = session(io);
        assert!((TtiCpx200Dp.measure_voltage(&mut s, 2).unwrap() - 4.994).abs() < 1e-9);
        assert!((TtiCpx200Dp.measure_current(&mut s, 1).unwrap() - 0.101).abs() < 1e-9);
    }

    #[test]
    fn cpx_has_two_channels() {
        let io = Scripted::default();
        let (mut s, t) = session(io);
        let err = TtiCpx200Dp.set_voltage(&mut s, 3, 1.0).unwrap_err();
        assert!(matches!(err, ScpiError::Channel(_)));
        assert!(t.0.borrow().writes.is_empty());
    }

    #[test]
    fn cpx_output_uses_numeric_form_and_verifies() {
        let mut io = Scripted::default();
        io.replies.insert("OP2?".into(), "1".into());
        let (mut s, t) = session(io);
        TtiCpx200Dp.set_output(&mut s, 2, true).unwrap();
        assert!(t.0.borrow().writes.iter().any(|w| w == "OP2 1"));
    }

    #[test]
    fn aim_tti_accepts_channel_one_without_selection() {
        let mut io = Scripted::default();
        io.fail_writes.push("INST:NSEL 1".into());
        io.fail_writes.push("INST:NSEL 2".into());
        let (mut s, _t) = session(io);
        AimTtiPsu.select_channel(&mut s, 1).unwrap();
        let err = AimTtiPsu.select_channel(&mut s, 2).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn ea9080_is_single_channel() {
        let io = Scripted::default();
        let (mut s, _t) = session(io);
        assert!(Ea9080Psu.select_channel(&mut s, 1).is_ok());
        let err = Ea9080Psu.select_channel(&mut s, 2).unwrap_err();
        assert!(matches!(err, ScpiError::Channel(_)));
    }

    #[test]
    fn ea9080_startup_locks_panel_and_drops_opc_gating() {
        let io = Scripted::default();
        let (mut s, t) = session(io);
        s.wait_opc = true;
        Ea9080Psu.startup(&mut s).unwrap();
        assert!(!s.wait_opc);
        assert_eq!(t.0.borrow().writes, vec!["SYST:LOCK ON"]);
    }

    #[test]
    fn ea9080_output_retries_bare_form_after_failed_verify() {
        let mut io = Scripted::default();
        io.replies.insert("OUTP?".into(), "0".into());
        let (mut s, t) = session(io);
        let err = Ea9080Psu.set_output(&mut s, 1, true).unwrap_err();
        assert!(matches!(err, ScpiError::Instrument { .. }));
        // verification ran once in the standard flow and once after the retry
        let asks = t.0.borrow().writes.iter().filter(|w| *w == "OUTP?").count();
        assert_eq!(asks, 2);
    }
}
