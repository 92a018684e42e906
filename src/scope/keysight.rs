//! Keysight / Agilent oscilloscope dialect (InfiniiVision families).

use std::time::Duration;

use crate::error::{Result, ScpiError};
use crate::parse;
use crate::scope::dialect::ScopeDialect;
use crate::session::Session;
use crate::tokens::{Measure, TokenFamily, TokenTable};

const MEASURE_OVERRIDES: &[(&str, &str)] = &[
    ("AVG", "VAV"),
    ("RMS", "VRMS"),
    ("TOP", "VTOP"),
    ("BASE", "VBASE"),
    ("PDUTY", "DUTY"),
];

const MATH_OVERRIDES: &[(&str, &str)] = &[("SUBTRACT", "SUBT"), ("ABSOLUTE", "ABS")];

/// Keysight dialect. Measurement queries use the single `:MEASure:<kind>?`
/// form; the display-data screenshot takes a bare `PNG` argument.
pub struct KeysightScope {
    tokens: TokenTable,
}

impl KeysightScope {
    /// Build with Keysight token spellings layered over the base vocabulary.
    pub fn new() -> Result<Self> {
        Ok(KeysightScope {
            tokens: TokenTable::with_overrides(&[
                (TokenFamily::Measure, MEASURE_OVERRIDES),
                (TokenFamily::Math, MATH_OVERRIDES),
            ])?,
        })
    }

    fn meas_args(&self, kind: Measure, src: &str, src2: Option<&str>) -> Result<(&'static str, String)> {
        let token = self.tokens.token(TokenFamily::Measure, kind.key())?;
        let two = kind.arity() == 2 || src2.is_some();
        let srcs = if two {
            format!("{src},{}", src2.unwrap_or("CHAN2"))
        } else {
            src.to_string()
        };
        Ok((token, srcs))
    }
}

impl ScopeDialect for KeysightScope {
    fn tokens(&self) -> &TokenTable {
        &self.tokens
    }

    fn enable_measure(
        &self,
        s: &mut Session,
        kind: Measure,
        src: &str,
        src2: Option<&str>,
    ) -> Result<()> {
        let (token, srcs) = self.meas_args(kind, src, src2)?;
        s.send(&format!(":MEASure:{token} {srcs}")).map_err(|err| {
            ScpiError::Unsupported(format!(
                "measurement {:?} not supported on this model: {err}",
                kind.key()
            ))
        })
    }

    fn measure(
        &self,
        s: &mut Session,
        kind: Measure,
        src: &str,
        src2: Option<&str>,
    ) -> Result<f64> {
        let (token, srcs) = self.meas_args(kind, src, src2)?;
        let resp = s.ask(&format!(":MEASure:{token}? {srcs}")).map_err(|err| {
            ScpiError::Unsupported(format!(
                "measurement {:?} not supported on this model: {err}",
                kind.key()
            ))
        })?;
        parse::number(&resp)
    }

    fn trigger_status(&self, s: &mut Session) -> Result<bool> {
        let resp = s.ask(":TER?")?;
        Ok(resp.trim().ends_with('1'))
    }

    fn math_ns(&self, math: u32) -> Result<String> {
        if math < 1 {
            return Err(ScpiError::Range("math channel must be >= 1".into()));
        }
        Ok(format!(":FUNCtion{math}"))
    }

    fn set_math_operator(&self, s: &mut Session, math: u32, op: crate::tokens::MathOperator) -> Result<()> {
        let ns = self.math_ns(math)?;
        let token = self.tokens.token(TokenFamily::Math, op.key())?;
        s.send(&format!("{ns}:OPERation {token}"))
    }

    fn set_math_enabled(&self, s: &mut Session, math: u32, on: bool) -> Result<()> {
        let ns = self.math_ns(math)?;
        s.send(&format!("{ns}:DISPlay {}", parse::bstr(on)))
    }

    fn set_math_scale(&self, s: &mut Session, math: u32, v_per_div: f64) -> Result<()> {
        let ns = self.math_ns(math)?;
        s.send(&format!("{ns}:SCALe {v_per_div}"))
    }

    fn set_math_offset(&self, s: &mut Session, math: u32, volts: f64) -> Result<()> {
        let ns = self.math_ns(math)?;
        s.send(&format!("{ns}:OFFSet {volts}"))
    }

    fn screenshot_png(&self, s: &mut Session) -> Result<Vec<u8>> {
        s.read_block(":DISP:DATA? PNG", Duration::from_secs(10))
    }
}
