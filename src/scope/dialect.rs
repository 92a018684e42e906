//! Oscilloscope dialect trait.
//!
//! Default method bodies implement the lowest-common-denominator SCPI forms
//! that most scopes accept; vendor dialects override only where their command
//! set deviates. All methods borrow the [`Session`] so one dialect instance
//! can serve any connection.

use std::time::Duration;

use log::debug;

use crate::error::{Result, ScpiError};
use crate::parse;
use crate::session::Session;
use crate::tokens::{ChannelUnit, Measure, MathOperator, Slope, TokenFamily, TokenTable, TriggerSweepMode};

/// Measurement statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasureStats {
    /// Running mean.
    pub mean: f64,
    /// Observed minimum.
    pub min: f64,
    /// Observed maximum.
    pub max: f64,
    /// Standard deviation.
    pub std: f64,
}

/// Channel mnemonic for 1-based analog channels.
pub(crate) fn chan(ch: u32) -> Result<String> {
    if ch < 1 {
        return Err(ScpiError::Channel("channels are 1-based".into()));
    }
    Ok(format!("CHAN{ch}"))
}

fn check_math(math: u32) -> Result<()> {
    if math < 1 {
        return Err(ScpiError::Range("math channel must be >= 1".into()));
    }
    Ok(())
}

fn check_slot(slot: u32) -> Result<()> {
    if slot != 1 && slot != 2 {
        return Err(ScpiError::Range("math source slot must be 1 or 2".into()));
    }
    Ok(())
}

/// Vendor-specific oscilloscope command surface.
#[allow(unused_variables)]
pub trait ScopeDialect {
    /// Token vocabulary for this dialect.
    fn tokens(&self) -> &TokenTable;

    // --- channels ---

    /// Show or hide an analog channel on screen.
    fn set_channel_enabled(&self, s: &mut Session, ch: u32, on: bool) -> Result<()> {
        let chan = chan(ch)?;
        let on = parse::bstr(on);
        s.send_first(
            &[format!(":{chan}:DISP {on}"), format!(":{chan}:STAT {on}")],
            "channel display enable",
        )
    }

    /// Whether the channel is shown; `None` when no query form is accepted.
    fn channel_enabled(&self, s: &mut Session, ch: u32) -> Result<Option<bool>> {
        let chan = chan(ch)?;
        for q in [format!(":{chan}:DISP?"), format!(":{chan}:STAT?")] {
            if let Ok(resp) = s.ask(&q) {
                return Ok(Some(parse::boolean(&resp)));
            }
        }
        Ok(None)
    }

    /// Vertical scale in volts per division.
    fn channel_scale(&self, s: &mut Session, ch: u32) -> Result<f64> {
        let resp = s.ask(&format!(":{}:SCAL?", chan(ch)?))?;
        parse::number(&resp)
    }

    /// Vertical offset in volts.
    fn channel_offset(&self, s: &mut Session, ch: u32) -> Result<f64> {
        let resp = s.ask(&format!(":{}:OFFS?", chan(ch)?))?;
        parse::number(&resp)
    }

    /// Set vertical scale in volts per division.
    fn set_channel_scale(&self, s: &mut Session, ch: u32, v_per_div: f64) -> Result<()> {
        s.send(&format!(":{}:SCAL {v_per_div}", chan(ch)?))
    }

    /// Set vertical offset in volts.
    fn set_channel_offset(&self, s: &mut Session, ch: u32, volts: f64) -> Result<()> {
        s.send(&format!(":{}:OFFS {volts}", chan(ch)?))
    }

    /// Input coupling. Lenient: unknown modes pass through uppercased.
    fn set_channel_coupling(&self, s: &mut Session, ch: u32, mode: &str) -> Result<()> {
        let token = self.tokens().token_lenient(TokenFamily::Coupling, mode);
        s.send(&format!(":{}:COUP {token}", chan(ch)?))
    }

    /// Vertical units for a channel.
    fn set_channel_units(&self, s: &mut Session, ch: u32, unit: ChannelUnit) -> Result<()> {
        let token = self.tokens().token(TokenFamily::ChannelUnit, unit.key())?;
        s.send(&format!(":{}:UNITs {token}", chan(ch)?))
    }

    /// Current vertical units, folded back to the abstract key where known.
    fn channel_units(&self, s: &mut Session, ch: u32) -> Result<String> {
        let resp = s.ask(&format!(":{}:UNITs?", chan(ch)?))?;
        Ok(self.tokens().untoken(TokenFamily::ChannelUnit, &resp))
    }

    // --- probe ---

    /// Probe attenuation factor (10.0 for a 10x probe).
    fn set_probe_attenuation(&self, s: &mut Session, ch: u32, factor: f64) -> Result<()> {
        s.send(&format!(":{}:PROBe {factor}", chan(ch)?))
    }

    /// Like [`ScopeDialect::set_probe_attenuation`], but dialects that only
    /// accept an enumerated factor series first snap `factor` to the nearest
    /// allowed entry instead of rejecting it. Dialects with no restriction
    /// program the factor as given.
    fn set_probe_attenuation_snapped(&self, s: &mut Session, ch: u32, factor: f64) -> Result<()> {
        self.set_probe_attenuation(s, ch, factor)
    }

    /// Read back the probe attenuation factor.
    fn probe_attenuation(&self, s: &mut Session, ch: u32) -> Result<f64> {
        let resp = s.ask(&format!(":{}:PROBe?", chan(ch)?))?;
        parse::number(&resp)
    }

    // --- timebase ---

    /// Horizontal scale in seconds per division.
    fn set_time_scale(&self, s: &mut Session, sec_per_div: f64) -> Result<()> {
        s.send(&format!(":TIM:SCAL {sec_per_div}"))
    }

    /// Read horizontal scale.
    fn time_scale(&self, s: &mut Session) -> Result<f64> {
        parse::number(&s.ask(":TIM:SCAL?")?)
    }

    /// Horizontal position in seconds.
    fn set_time_position(&self, s: &mut Session, sec: f64) -> Result<()> {
        s.send(&format!(":TIM:POS {sec}"))
    }

    // --- trigger ---

    /// Configure an edge trigger in one go: mode, source, level, slope.
    fn set_edge_trigger(&self, s: &mut Session, source: &str, level: f64, slope: Slope) -> Result<()> {
        s.send(":TRIG:MODE EDGE")?;
        s.send(&format!(":TRIG:EDGE:SOUR {source}"))?;
        s.send(&format!(":TRIG:LEV {level}"))?;
        s.send(&format!(":TRIG:EDGE:SLOP {}", slope.token()))
    }

    /// Trigger sweep mode.
    fn set_trigger_sweep(&self, s: &mut Session, mode: TriggerSweepMode) -> Result<()> {
        let token = self.tokens().token(TokenFamily::TriggerSweep, mode.key())?;
        s.send(&format!(":TRIG:SWE {token}"))
    }

    /// Current sweep mode, folded back to the abstract key where known.
    fn trigger_sweep(&self, s: &mut Session) -> Result<String> {
        let resp = s.ask(":TRIG:SWE?")?;
        Ok(self.tokens().untoken(TokenFamily::TriggerSweep, &resp))
    }

    /// Whether a trigger occurred since the last read. Reading clears the
    /// event register on instruments that use `:TER?`.
    fn trigger_status(&self, s: &mut Session) -> Result<bool> {
        let resp = s.ask(":TER?")?;
        let u = resp.trim().to_uppercase();
        Ok(u.starts_with('1') || u.starts_with("ON") || u.starts_with("TRUE"))
    }

    // --- acquisition ---

    /// Continuous acquisition.
    fn run(&self, s: &mut Session) -> Result<()> {
        s.send(":RUN")
    }

    /// Stop acquisition.
    fn stop(&self, s: &mut Session) -> Result<()> {
        s.send(":STOP")
    }

    /// Arm a single acquisition. Completion gating is suspended because the
    /// scope blocks until triggered; the follow-up status read clears any
    /// stale trigger event.
    fn single(&self, s: &mut Session) -> Result<()> {
        s.suspended_opc(|s| {
            s.send(":SING")?;
            self.trigger_status(s)?;
            Ok(())
        })
    }

    /// Force a trigger event.
    fn force_trigger(&self, s: &mut Session) -> Result<()> {
        s.send(":TRIGger:FORCe")
    }

    // --- math ---

    /// Command namespace for a 1-based math channel. The generic dialect has
    /// a single unnumbered math channel.
    fn math_ns(&self, math: u32) -> Result<String> {
        check_math(math)?;
        Ok(":MATH".to_string())
    }

    /// Attach a source waveform to math slot 1 or 2.
    fn set_math_source(&self, s: &mut Session, math: u32, slot: u32, src: &str) -> Result<()> {
        check_slot(slot)?;
        let ns = self.math_ns(math)?;
        s.send(&format!("{ns}:SOUR{slot} {src}"))
    }

    /// Select the math operator.
    fn set_math_operator(&self, s: &mut Session, math: u32, op: MathOperator) -> Result<()> {
        let ns = self.math_ns(math)?;
        let token = self.tokens().token(TokenFamily::Math, op.key())?;
        s.send(&format!("{ns}:OPER {token}"))
    }

    /// Show or hide the math trace.
    fn set_math_enabled(&self, s: &mut Session, math: u32, on: bool) -> Result<()> {
        let ns = self.math_ns(math)?;
        s.send(&format!("{ns}:DISP {}", parse::bstr(on)))
    }

    /// Math trace vertical scale.
    fn set_math_scale(&self, s: &mut Session, math: u32, v_per_div: f64) -> Result<()> {
        let ns = self.math_ns(math)?;
        s.send(&format!("{ns}:SCAL {v_per_div}"))
    }

    /// Math trace vertical offset.
    fn set_math_offset(&self, s: &mut Session, math: u32, volts: f64) -> Result<()> {
        let ns = self.math_ns(math)?;
        s.send(&format!("{ns}:OFFS {volts}"))
    }

    // --- measurements ---

    /// Add a measurement to the on-screen list.
    fn enable_measure(
        &self,
        s: &mut Session,
        kind: Measure,
        src: &str,
        src2: Option<&str>,
    ) -> Result<()> {
        let token = self.tokens().token(TokenFamily::Measure, kind.key())?;
        let two = kind.arity() == 2 || src2.is_some();
        let src2 = src2.unwrap_or("CHAN2");
        let forms = if two {
            vec![
                format!(":MEAS:ITEM {token},{src},{src2}"),
                format!(":MEAS:{token} {src},{src2}"),
                format!(":MEAS:{token} {src},{src2},DEF,DEF"),
            ]
        } else {
            vec![
                format!(":MEAS:ITEM {token},{src}"),
                format!(":MEAS:{token} {src}"),
                format!(":MEAS:{token} {src},DEF,DEF"),
            ]
        };
        s.send_first(&forms, "measurement enable")
    }

    /// One-shot measurement value. Tries the dialect's query forms in order;
    /// a form whose reply fails to parse counts as a failed attempt.
    fn measure(
        &self,
        s: &mut Session,
        kind: Measure,
        src: &str,
        src2: Option<&str>,
    ) -> Result<f64> {
        let token = self.tokens().token(TokenFamily::Measure, kind.key())?;
        let two = kind.arity() == 2 || src2.is_some();
        let src2 = src2.unwrap_or("CHAN2");
        let forms = if two {
            vec![
                format!(":MEAS:ITEM? {token},{src},{src2}"),
                format!(":MEAS:{token}? {src},{src2}"),
                format!(":MEAS:{token}? {src},{src2},DEF,DEF"),
            ]
        } else {
            vec![
                format!(":MEAS:ITEM? {token},{src}"),
                format!(":MEAS:{token}? {src}"),
                format!(":MEAS:{token}? {src},DEF,DEF"),
            ]
        };
        let mut last = None;
        for q in &forms {
            match s.ask(q).and_then(|resp| parse::number(&resp)) {
                Ok(v) => return Ok(v),
                Err(err) => {
                    debug!("measure form '{q}' failed: {err}");
                    last = Some(err);
                }
            }
        }
        Err(ScpiError::Unsupported(format!(
            "measurement {} not supported on this model (last attempt: {})",
            kind.key(),
            last.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Toggle measurement statistics collection.
    fn enable_measure_stats(&self, s: &mut Session, on: bool) -> Result<()> {
        let val = parse::bstr(on);
        s.send_first(
            &[format!(":MEAS:STAT {val}"), format!(":MEAS:STAT:STATE {val}")],
            "measure stats toggle",
        )
    }

    /// Remove all measurements from the on-screen list.
    fn clear_measures(&self, s: &mut Session) -> Result<()> {
        s.send(":MEASure:CLEar")
            .map_err(|err| ScpiError::Unsupported(format!("measures clear not supported: {err}")))
    }

    /// Reset collected statistics.
    fn clear_measure_stats(&self, s: &mut Session) -> Result<()> {
        s.send_first(
            &[":MEAS:STAT:CLEAR".to_string(), ":MEAS:STAT:RES".to_string()],
            "measure stats clear",
        )
    }

    /// Statistics for one measurement. Responses carry at least four values
    /// (mean, min, max, std), comma or semicolon separated.
    fn measure_stats(&self, s: &mut Session, kind: Measure, src: &str) -> Result<MeasureStats> {
        let token = self.tokens().token(TokenFamily::Measure, kind.key())?;
        let forms = [
            format!(":MEAS:STAT:ITEM? {token},{src}"),
            format!(":MEAS:STAT:ITEM? {token},{src},ALL"),
        ];
        for q in &forms {
            let resp = match s.ask(q) {
                Ok(r) => r,
                Err(err) => {
                    debug!("stats form '{q}' failed: {err}");
                    continue;
                }
            };
            let vals: Vec<f64> = resp
                .trim()
                .replace(';', ",")
                .split(',')
                .filter_map(|x| parse::number(x).ok())
                .collect();
            if vals.len() >= 4 {
                return Ok(MeasureStats {
                    mean: vals[0],
                    min: vals[1],
                    max: vals[2],
                    std: vals[3],
                });
            }
        }
        Err(ScpiError::Unsupported(
            "measure stats not supported on this model".into(),
        ))
    }

    // --- display / hardcopy ---

    /// Screenshot as PNG bytes. Tries the display-data block forms, then a
    /// hardcopy fallback over the raw read path.
    fn screenshot_png(&self, s: &mut Session) -> Result<Vec<u8>> {
        for cmd in [
            ":DISPlay:DATA? PNG,SCReen,ON",
            ":DISP:DATA? PNG,SCREEN,ON",
            ":DISP:DATA? PNG",
        ] {
            match s.read_block(cmd, Duration::from_secs(10)) {
                Ok(bytes) => return Ok(bytes),
                Err(err) => debug!("screenshot form '{cmd}' failed: {err}"),
            }
        }
        s.suspended(|s| {
            s.send_raw(":HCOPy:DEVice:LANGuage PNG")?;
            s.send_raw(":HCOPy:IMMediate")?;
            s.read_raw()
        })
    }

    /// Dismiss on-screen menus for a clean screenshot.
    fn menu_off(&self, s: &mut Session) -> Result<()> {
        s.send(":DISPlay:MENU OFF")
            .map_err(|err| ScpiError::Unsupported(format!("menu off not supported: {err}")))
    }

    // --- lifecycle ---

    /// Hard reset and readiness probe. The completion poll and trailing
    /// error read are best effort; a scope that stays busy past the timeout
    /// is left for the caller to retry.
    fn reset(&self, s: &mut Session, opc_timeout: Duration) -> Result<()> {
        s.device_clear();
        s.send("*RST")?;
        s.send("*CLS")?;
        if !s.opc_once(opc_timeout) {
            debug!("instrument still busy after reset probe");
        }
        let _ = s.ask(":SYSTem:ERRor?");
        Ok(())
    }
}

/// Lowest-common-denominator dialect used when no registry entry matches.
pub struct GenericScope {
    tokens: TokenTable,
}

impl GenericScope {
    /// Build with the base token vocabulary.
    pub fn new() -> Result<Self> {
        Ok(GenericScope {
            tokens: TokenTable::base()?,
        })
    }
}

impl ScopeDialect for GenericScope {
    fn tokens(&self) -> &TokenTable {
        &self.tokens
    }
}
