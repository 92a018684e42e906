//! Rigol oscilloscope dialect (DS1000Z, MSO2000/4000 families).

use crate::error::{Result, ScpiError};
use crate::scope::dialect::{chan, ScopeDialect};
use crate::session::Session;
use crate::tokens::{Slope, TokenFamily, TokenTable};

/// Probe attenuation factors Rigol firmware accepts.
const PROBE_FACTORS: &[f64] = &[
    0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0,
];

const MEASURE_OVERRIDES: &[(&str, &str)] = &[
    ("TOP", "VTOP"),
    ("BASE", "VBASE"),
    ("AVG", "VAVG"),
    ("RMS", "VRMS"),
    ("RISE", "RTIMe"),
    ("FALL", "FTIMe"),
    ("PDUTY", "PDUTy"),
    ("NDUTY", "NDUTy"),
    ("PWID", "PWDIth"),
    ("NWID", "NWIDth"),
];

const MATH_OVERRIDES: &[(&str, &str)] = &[("SUBTRACT", "SUBT"), ("ABSOLUTE", "ABS")];

/// Rigol dialect.
pub struct RigolScope {
    tokens: TokenTable,
}

impl RigolScope {
    /// Build with Rigol token spellings layered over the base vocabulary.
    pub fn new() -> Result<Self> {
        Ok(RigolScope {
            tokens: TokenTable::with_overrides(&[
                (TokenFamily::Measure, MEASURE_OVERRIDES),
                (TokenFamily::Math, MATH_OVERRIDES),
            ])?,
        })
    }
}

impl ScopeDialect for RigolScope {
    fn tokens(&self) -> &TokenTable {
        &self.tokens
    }

    // Rigol wants the coupling mode verbatim, no token cascade.
    fn set_channel_coupling(&self, s: &mut Session, ch: u32, mode: &str) -> Result<()> {
        s.send(&format!(":{}:COUP {}", chan(ch)?, mode.trim().to_uppercase()))
    }

    fn set_probe_attenuation(&self, s: &mut Session, ch: u32, factor: f64) -> Result<()> {
        let accepted = PROBE_FACTORS
            .iter()
            .find(|a| (**a - factor).abs() <= **a * 1e-9)
            .ok_or_else(|| {
                ScpiError::Range(format!(
                    "probe factor {factor} not in Rigol's 1-2-5 series ({PROBE_FACTORS:?})"
                ))
            })?;
        s.send(&format!(":{}:PROBe {accepted}", chan(ch)?))
    }

    fn set_probe_attenuation_snapped(&self, s: &mut Session, ch: u32, factor: f64) -> Result<()> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(ScpiError::Range(format!(
                "probe factor {factor} cannot be snapped to the 1-2-5 series"
            )));
        }
        // Nearest by absolute distance; ties resolve to the smaller factor.
        let mut nearest = PROBE_FACTORS[0];
        for &a in PROBE_FACTORS {
            if (a - factor).abs() < (nearest - factor).abs() {
                nearest = a;
            }
        }
        s.send(&format!(":{}:PROBe {nearest}", chan(ch)?))
    }

    fn set_time_position(&self, s: &mut Session, sec: f64) -> Result<()> {
        s.send(&format!(":TIM:OFFS {sec}"))
    }

    fn set_edge_trigger(&self, s: &mut Session, source: &str, level: f64, slope: Slope) -> Result<()> {
        s.send(":TRIG:MODE EDGE")?;
        s.send(&format!(":TRIG:EDGE:SOUR {source}"))?;
        s.send(&format!(":TRIG:EDGE:LEVel {level}"))?;
        s.send(&format!(":TRIG:EDGE:SLOP {}", slope.token()))
    }

    // :TER? is not implemented; the acquisition state query reports STOP
    // once a single capture has completed.
    fn trigger_status(&self, s: &mut Session) -> Result<bool> {
        let resp = s.ask(":TRIG:STAT?")?;
        Ok(resp.trim().to_uppercase().ends_with("STOP"))
    }

    fn force_trigger(&self, s: &mut Session) -> Result<()> {
        s.send(":TFORce")
    }

    fn math_ns(&self, math: u32) -> Result<String> {
        if math < 1 {
            return Err(ScpiError::Range("math channel must be >= 1".into()));
        }
        Ok(format!(":MATH{math}"))
    }

    fn clear_measures(&self, s: &mut Session) -> Result<()> {
        s.send(":MEASure:CLEar ALL")
            .map_err(|err| ScpiError::Unsupported(format!("measures clear not supported: {err}")))
    }

    fn enable_measure_stats(&self, s: &mut Session, on: bool) -> Result<()> {
        s.send(&format!(
            ":MEASure:STATistic:DISPlay {}",
            crate::parse::bstr(on)
        ))
        .map_err(|err| ScpiError::Unsupported(format!("measure stats toggle not supported: {err}")))
    }

    fn menu_off(&self, s: &mut Session) -> Result<()> {
        s.send(":SYSTem:KEY:PRESs MOFF")
            .map_err(|err| ScpiError::Unsupported(format!("menu off not supported: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_overrides_layer_over_base() {
        let d = RigolScope::new().unwrap();
        let t = d.tokens();
        assert_eq!(t.token(TokenFamily::Measure, "AVG").unwrap(), "VAVG");
        assert_eq!(t.token(TokenFamily::Measure, "VPP").unwrap(), "VPP");
        assert_eq!(t.token(TokenFamily::Math, "SUBTRACT").unwrap(), "SUBT");
        assert_eq!(t.token(TokenFamily::Math, "ADD").unwrap(), "ADD");
    }

    #[test]
    fn math_namespace_is_numbered() {
        let d = RigolScope::new().unwrap();
        assert_eq!(d.math_ns(1).unwrap(), ":MATH1");
        assert!(d.math_ns(0).is_err());
    }

    #[test]
    fn off_series_probe_factor_snaps_to_nearest_entry() {
        use crate::session::{Session, SessionOptions};
        use crate::transport::Transport;
        use std::cell::RefCell;
        use std::io;
        use std::rc::Rc;
        use std::time::Duration;

        #[derive(Clone)]
        struct Recorder(Rc<RefCell<Vec<String>>>);
        impl Transport for Recorder {
            fn write(&mut self, cmd: &str) -> io::Result<()> {
                self.0.borrow_mut().push(cmd.to_string());
                Ok(())
            }
            fn query(&mut self, _cmd: &str) -> io::Result<String> {
                Ok("0,No error".to_string())
            }
            fn timeout(&self) -> Duration {
                Duration::from_secs(1)
            }
            fn set_timeout(&mut self, _t: Duration) -> io::Result<()> {
                Ok(())
            }
        }

        let wrote = Rc::new(RefCell::new(Vec::new()));
        let d = RigolScope::new().unwrap();
        let mut s = Session::new(
            Box::new(Recorder(Rc::clone(&wrote))),
            SessionOptions {
                check_errors: false,
                wait_opc: false,
            },
        );
        d.set_probe_attenuation_snapped(&mut s, 1, 3.0).unwrap();
        d.set_probe_attenuation_snapped(&mut s, 2, 0.7).unwrap();
        assert_eq!(
            *wrote.borrow(),
            vec![":CHAN1:PROBe 2".to_string(), ":CHAN2:PROBe 0.5".to_string()]
        );
        assert!(matches!(
            d.set_probe_attenuation_snapped(&mut s, 1, f64::NAN),
            Err(ScpiError::Range(_))
        ));
    }

    #[test]
    fn probe_factor_outside_series_is_range_error() {
        use crate::session::{Session, SessionOptions};
        use crate::transport::Transport;
        use std::io;
        use std::time::Duration;

        struct Null;
        impl Transport for Null {
            fn write(&mut self, _cmd: &str) -> io::Result<()> {
                panic!("validation must reject before any IO")
            }
            fn query(&mut self, _cmd: &str) -> io::Result<String> {
                panic!("validation must reject before any IO")
            }
            fn timeout(&self) -> Duration {
                Duration::from_secs(1)
            }
            fn set_timeout(&mut self, _t: Duration) -> io::Result<()> {
                Ok(())
            }
        }

        let d = RigolScope::new().unwrap();
        let mut s = Session::new(Box::new(Null), SessionOptions::default());
        let err = d.set_probe_attenuation(&mut s, 1, 3.0).unwrap_err();
        assert!(matches!(err, ScpiError::Range(_)));
    }
}
