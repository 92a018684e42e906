//! Oscilloscope control.
//!
//! [`Oscilloscope`] is a thin facade over a checked [`Session`] and a
//! vendor [`ScopeDialect`] resolved from `*IDN?`. Construct it over any
//! [`Transport`], call [`Oscilloscope::initialize`] once, then drive the
//! instrument through the facade methods.
//!
//! ```no_run
//! use labscpi::{Oscilloscope, Transport};
//! # fn open() -> Box<dyn Transport> { unimplemented!() }
//! # fn main() -> labscpi::Result<()> {
//! let mut scope = Oscilloscope::connect(open());
//! scope.initialize()?;
//! scope.set_time_scale(1e-3)?;
//! let (vdiv, offset) = scope.autoscale_channel(1)?;
//! # Ok(()) }
//! ```

mod autoscale;
mod dialect;
mod keysight;
mod rigol;
mod rohde_schwarz;

pub use autoscale::{fits_80, round_sig2, snap125_down, snap125_up};
pub use dialect::{GenericScope, MeasureStats, ScopeDialect};
pub use keysight::KeysightScope;
pub use rigol::RigolScope;
pub use rohde_schwarz::RohdeSchwarzScope;

use std::time::{Duration, Instant};

use log::{debug, info};

use crate::error::{Result, ScpiError};
use crate::identity::Identity;
use crate::registry::{resolve, DialectEntry};
use crate::session::{Session, SessionOptions};
use crate::tokens::{ChannelUnit, Measure, MathOperator, Slope, TriggerSweepMode};
use crate::transport::Transport;

fn make_rigol() -> Result<Box<dyn ScopeDialect>> {
    Ok(Box::new(RigolScope::new()?))
}

fn make_keysight() -> Result<Box<dyn ScopeDialect>> {
    Ok(Box::new(KeysightScope::new()?))
}

fn make_rohde_schwarz() -> Result<Box<dyn ScopeDialect>> {
    Ok(Box::new(RohdeSchwarzScope::new()?))
}

fn make_generic() -> Result<Box<dyn ScopeDialect>> {
    Ok(Box::new(GenericScope::new()?))
}

/// Registered oscilloscope dialects.
pub static SCOPE_DIALECTS: &[DialectEntry<dyn ScopeDialect>] = &[
    DialectEntry {
        name: "rigol-mso2000",
        priority: 2,
        model_patterns: &[",MSO?[24]\\d{2}"],
        brand_aliases: &[],
        make: make_rigol,
    },
    DialectEntry {
        name: "rigol",
        priority: 1,
        model_patterns: &[],
        brand_aliases: &["RIGOL", "RIGOL TECHNOLOGIES"],
        make: make_rigol,
    },
    DialectEntry {
        name: "keysight",
        priority: 1,
        model_patterns: &[],
        brand_aliases: &["KEYSIGHT TECHNOLOGIES", "KEYSIGHT", "AGILENT", "HEWLETT-PACKARD", "HP"],
        make: make_keysight,
    },
    DialectEntry {
        name: "rohde-schwarz",
        priority: 1,
        model_patterns: &[],
        brand_aliases: &["ROHDE", "R&S"],
        make: make_rohde_schwarz,
    },
];

/// Brand-agnostic oscilloscope controller.
pub struct Oscilloscope {
    session: Option<Session>,
    dialect: Option<Box<dyn ScopeDialect>>,
    dialect_name: Option<&'static str>,
    identity: Option<Identity>,
}

impl Oscilloscope {
    /// Wrap a transport with default protocol options (error checking and
    /// completion gating both on).
    pub fn connect(transport: Box<dyn Transport>) -> Self {
        Self::with_options(transport, SessionOptions::default())
    }

    /// Wrap a transport with explicit protocol options.
    pub fn with_options(transport: Box<dyn Transport>, options: SessionOptions) -> Self {
        Oscilloscope {
            session: Some(Session::new(transport, options)),
            dialect: None,
            dialect_name: None,
            identity: None,
        }
    }

    /// Query `*IDN?` and resolve the dialect. Idempotent; later calls return
    /// without touching the instrument.
    pub fn initialize(&mut self) -> Result<()> {
        if self.dialect.is_some() && self.identity.is_some() {
            return Ok(());
        }
        let session = self.session.as_mut().ok_or(ScpiError::NotConnected)?;
        let idn = session.ask("*IDN?")?.trim().to_string();
        let identity = Identity::parse(&idn);
        debug!("IDN parsed: {identity:?}");
        let resolved = resolve(SCOPE_DIALECTS, &idn, "generic", make_generic)?;
        info!("scope {identity} using dialect {}", resolved.name);
        self.dialect = Some(resolved.dialect);
        self.dialect_name = Some(resolved.name);
        self.identity = Some(identity);
        Ok(())
    }

    /// Drop the session and dialect. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.session = None;
        self.dialect = None;
        self.dialect_name = None;
        self.identity = None;
    }

    /// Parsed identity, once initialized.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Name of the resolved dialect, once initialized.
    pub fn dialect_name(&self) -> Option<&'static str> {
        self.dialect_name
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

    fn parts(&mut self) -> Result<(&mut Session, &dyn ScopeDialect)> {
        match (self.session.as_mut(), self.dialect.as_deref()) {
            (Some(session), Some(dialect)) => Ok((session, dialect)),
            _ => Err(ScpiError::NotConnected),
        }
    }

    // ----- channels -----

    /// Show or hide an analog channel.
    pub fn set_channel_enabled(&mut self, ch: u32, on: bool) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_channel_enabled(s, ch, on)
    }

    /// Whether a channel is shown; `None` when the scope has no query form.
    pub fn channel_enabled(&mut self, ch: u32) -> Result<Option<bool>> {
        let (s, d) = self.parts()?;
        d.channel_enabled(s, ch)
    }

    /// Vertical scale in volts per division.
    pub fn channel_scale(&mut self, ch: u32) -> Result<f64> {
        let (s, d) = self.parts()?;
        d.channel_scale(s, ch)
    }

    /// Vertical offset in volts.
    pub fn channel_offset(&mut self, ch: u32) -> Result<f64> {
        let (s, d) = self.parts()?;
        d.channel_offset(s, ch)
    }

    /// Set vertical scale.
    pub fn set_channel_scale(&mut self, ch: u32, v_per_div: f64) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_channel_scale(s, ch, v_per_div)
    }

    /// Set vertical offset.
    pub fn set_channel_offset(&mut self, ch: u32, volts: f64) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_channel_offset(s, ch, volts)
    }

    /// Input coupling (`"DC"`, `"AC"`, `"GND"`; vendor extras pass through).
    pub fn set_channel_coupling(&mut self, ch: u32, mode: &str) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_channel_coupling(s, ch, mode)
    }

    /// Vertical units.
    pub fn set_channel_units(&mut self, ch: u32, unit: ChannelUnit) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_channel_units(s, ch, unit)
    }

    /// Current vertical units, abstract key where recognized.
    pub fn channel_units(&mut self, ch: u32) -> Result<String> {
        let (s, d) = self.parts()?;
        d.channel_units(s, ch)
    }

    // ----- probe -----

    /// Probe attenuation factor.
    pub fn set_probe_attenuation(&mut self, ch: u32, factor: f64) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_probe_attenuation(s, ch, factor)
    }

    /// Set probe attenuation, snapping to the nearest allowed factor on
    /// dialects that restrict the series.
    pub fn set_probe_attenuation_snapped(&mut self, ch: u32, factor: f64) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_probe_attenuation_snapped(s, ch, factor)
    }

    /// Read back probe attenuation.
    pub fn probe_attenuation(&mut self, ch: u32) -> Result<f64> {
        let (s, d) = self.parts()?;
        d.probe_attenuation(s, ch)
    }

    /// Current-probe sensitivity in volts per ampere, expressed through the
    /// attenuation factor.
    pub fn set_probe_sensitivity(&mut self, ch: u32, v_per_a: f64) -> Result<()> {
        if v_per_a == 0.0 {
            return Err(ScpiError::Range("probe sensitivity must be nonzero".into()));
        }
        self.set_probe_attenuation(ch, 1.0 / v_per_a)
    }

    /// Read back probe sensitivity in volts per ampere.
    pub fn probe_sensitivity(&mut self, ch: u32) -> Result<f64> {
        let factor = self.probe_attenuation(ch)?;
        if factor == 0.0 {
            return Err(ScpiError::Parse("zero probe attenuation readback".into()));
        }
        Ok(1.0 / factor)
    }

    // ----- timebase -----

    /// Horizontal scale in seconds per division.
    pub fn set_time_scale(&mut self, sec_per_div: f64) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_time_scale(s, sec_per_div)
    }

    /// Read horizontal scale.
    pub fn time_scale(&mut self) -> Result<f64> {
        let (s, d) = self.parts()?;
        d.time_scale(s)
    }

    /// Horizontal position in seconds.
    pub fn set_time_position(&mut self, sec: f64) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_time_position(s, sec)
    }

    // ----- trigger -----

    /// Configure an edge trigger.
    pub fn set_edge_trigger(&mut self, source: &str, level: f64, slope: Slope) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_edge_trigger(s, source, level, slope)
    }

    /// Set the sweep mode and read it back to confirm the instrument took it.
    pub fn set_trigger_sweep(&mut self, mode: TriggerSweepMode) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_trigger_sweep(s, mode)?;
        d.trigger_sweep(s)?;
        Ok(())
    }

    /// Current sweep mode.
    pub fn trigger_sweep(&mut self) -> Result<String> {
        let (s, d) = self.parts()?;
        d.trigger_sweep(s)
    }

    /// Whether a trigger occurred since the last read.
    pub fn trigger_status(&mut self) -> Result<bool> {
        let (s, d) = self.parts()?;
        d.trigger_status(s)
    }

    // ----- acquisition -----

    /// Continuous acquisition.
    pub fn run(&mut self) -> Result<()> {
        let (s, d) = self.parts()?;
        d.run(s)
    }

    /// Stop acquisition.
    pub fn stop(&mut self) -> Result<()> {
        let (s, d) = self.parts()?;
        d.stop(s)
    }

    /// Arm a single acquisition.
    pub fn single(&mut self) -> Result<()> {
        let (s, d) = self.parts()?;
        d.single(s)
    }

    /// Force a trigger event.
    pub fn force_trigger(&mut self) -> Result<()> {
        let (s, d) = self.parts()?;
        d.force_trigger(s)
    }

    /// Poll until the armed single acquisition has triggered, or `timeout`
    /// elapses. Returns whether a trigger was seen.
    pub fn wait_for_single_acq(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        if self.trigger_status()? {
            return Ok(true);
        }
        while Instant::now() < deadline {
            if self.trigger_status()? {
                return Ok(true);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(false)
    }

    // ----- math -----

    /// Attach a source to math slot 1 or 2.
    pub fn set_math_source(&mut self, math: u32, slot: u32, src: &str) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_math_source(s, math, slot, src)
    }

    /// Select the math operator.
    pub fn set_math_operator(&mut self, math: u32, op: MathOperator) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_math_operator(s, math, op)
    }

    /// Show or hide the math trace.
    pub fn set_math_enabled(&mut self, math: u32, on: bool) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_math_enabled(s, math, on)
    }

    /// Select an operator and toggle the trace in one call.
    pub fn enable_math(&mut self, math: u32, on: bool, op: MathOperator) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_math_operator(s, math, op)?;
        d.set_math_enabled(s, math, on)
    }

    /// Math trace vertical scale.
    pub fn set_math_scale(&mut self, math: u32, v_per_div: f64) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_math_scale(s, math, v_per_div)
    }

    /// Math trace vertical offset.
    pub fn set_math_offset(&mut self, math: u32, volts: f64) -> Result<()> {
        let (s, d) = self.parts()?;
        d.set_math_offset(s, math, volts)
    }

    // ----- measurements -----

    /// One-shot measurement value.
    pub fn measure(&mut self, kind: Measure, src: &str, src2: Option<&str>) -> Result<f64> {
        let (s, d) = self.parts()?;
        d.measure(s, kind, src, src2)
    }

    /// Add a measurement to the on-screen list.
    pub fn enable_measure(&mut self, kind: Measure, src: &str, src2: Option<&str>) -> Result<()> {
        let (s, d) = self.parts()?;
        d.enable_measure(s, kind, src, src2)
    }

    /// Remove all measurements.
    pub fn clear_measures(&mut self) -> Result<()> {
        let (s, d) = self.parts()?;
        d.clear_measures(s)
    }

    /// Toggle statistics collection.
    pub fn enable_measure_stats(&mut self, on: bool) -> Result<()> {
        let (s, d) = self.parts()?;
        d.enable_measure_stats(s, on)
    }

    /// Reset collected statistics.
    pub fn clear_measure_stats(&mut self) -> Result<()> {
        let (s, d) = self.parts()?;
        d.clear_measure_stats(s)
    }

    /// Statistics for one measurement.
    pub fn measure_stats(&mut self, kind: Measure, src: &str) -> Result<MeasureStats> {
        let (s, d) = self.parts()?;
        d.measure_stats(s, kind, src)
    }

    // ----- display -----

    /// Screenshot as PNG bytes.
    pub fn screenshot_png(&mut self) -> Result<Vec<u8>> {
        let (s, d) = self.parts()?;
        d.screenshot_png(s)
    }

    /// Dismiss on-screen menus.
    pub fn menu_off(&mut self) -> Result<()> {
        let (s, d) = self.parts()?;
        d.menu_off(s)
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

    // ----- recovery -----

    /// Flush transport buffers and the instrument error queue without
    /// resetting any settings. Best effort throughout.
    pub fn clear_io(&mut self) -> Result<()> {
        let session = self.session_mut()?;
        session.device_clear();
        // Drain residual device output under a short timeout.
        let old = session.timeout();
        if session.set_timeout(Duration::from_millis(50)).is_ok() {
            while session.read_raw().map(|b| !b.is_empty()).unwrap_or(false) {}
            let _ = session.set_timeout(old);
        }
        session.suspended(|s| {
            let _ = s.send_raw("*CLS");
            for _ in 0..16 {
                match s.ask("SYST:ERR?") {
                    Ok(line) if line.trim().starts_with('0') => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
            Ok(())
        })
    }

    /// Hard reset and readiness probe.
    pub fn reset(&mut self, opc_timeout: Duration) -> Result<()> {
        let (s, d) = self.parts()?;
        d.reset(s, opc_timeout)
    }

    // ----- autoscale -----

    /// Autoscale one channel's vertical scale and offset: zoom out until the
    /// trace is measurable and on screen, center it, then tighten one 1-2-5
    /// step at a time and keep the last configuration that still fits.
    /// Returns the final (volts per division, offset) pair.
    pub fn autoscale_channel(&mut self, ch: u32) -> Result<(f64, f64)> {
        self.autoscale_channel_iters(ch, 20)
    }

    /// [`Oscilloscope::autoscale_channel`] with an explicit per-phase
    /// iteration cap.
    pub fn autoscale_channel_iters(&mut self, ch: u32, max_iters: u32) -> Result<(f64, f64)> {
        self.parts()?;
        autoscale::run(self, ch, max_iters)
    }
}
