//! Vertical autoscale for one channel.
//!
//! Mirrors how an operator scales a trace by hand: zoom out until VMIN/VMAX
//! are both on screen, center the trace, then tighten one 1-2-5 step at a
//! time and revert as soon as the fit breaks. Works entirely through the
//! measurement and vertical-scale commands, no vendor autoscale button.

use log::debug;

use crate::error::Result;
use crate::scope::Oscilloscope;
use crate::tokens::Measure;

/// Snap up to the next 1-2-5 value (2.6 -> 5, 5.0 stays 5).
pub fn snap125_up(x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    let e = x.log10().floor();
    let m = x / 10f64.powf(e);
    for b in [1.0, 2.0, 5.0, 10.0] {
        if m <= b + 1e-12 {
            return b * 10f64.powf(e);
        }
    }
    10.0 * 10f64.powf(e)
}

/// Snap down to the previous 1-2-5 value (2.6 -> 2, 2.0 stays 2).
pub fn snap125_down(x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    let e = x.log10().floor();
    let m = x / 10f64.powf(e);
    for b in [10.0, 5.0, 2.0, 1.0] {
        if m >= b - 1e-12 {
            return b * 10f64.powf(e);
        }
    }
    10f64.powf(e)
}

/// Round to two significant digits, the precision offsets are requested at.
pub fn round_sig2(x: f64) -> f64 {
    if x == 0.0 {
        return 0.0;
    }
    let e = x.abs().log10().floor() as i32;
    let ndp = (1 - e).max(0);
    let f = 10f64.powi(ndp);
    (x * f).round() / f
}

/// Both extrema fit inside 80% of the screen, i.e. within 3.2 divisions of
/// the center line.
pub fn fits_80(vmax: f64, vmin: f64, offs: f64, vdiv: f64) -> bool {
    let lim = 3.2 * vdiv;
    (vmax - offs) <= lim + 1e-12 && (offs - vmin) <= lim + 1e-12
}

/// Reject non-finite, degenerate (flat) and absurdly large extrema readings.
fn extrema_ok(vmax: f64, vmin: f64) -> bool {
    vmax.is_finite()
        && vmin.is_finite()
        && vmax != vmin
        && vmax.abs() <= 1e18
        && vmin.abs() <= 1e18
}

/// The scale stopped moving: the instrument clamped at its range limit.
fn step_floor(new: f64, prev: f64) -> bool {
    (new - prev).abs() <= f64::max(1e-12, 1e-6 * prev.abs())
}

struct Extrema {
    measured_once: bool,
}

impl Extrema {
    /// Read VMAX/VMIN. The first failing read propagates so a scope without
    /// measurement support fails loudly; once one read has succeeded, later
    /// failures are folded into "unreadable" and drive a zoom-out or revert.
    fn read(&mut self, scope: &mut Oscilloscope, ch: u32) -> Result<Option<(f64, f64)>> {
        let src = format!("CHAN{ch}");
        let out = scope
            .measure(Measure::Vmax, &src, None)
            .and_then(|vmax| scope.measure(Measure::Vmin, &src, None).map(|vmin| (vmax, vmin)));
        match out {
            Ok((vmax, vmin)) => {
                self.measured_once = true;
                if extrema_ok(vmax, vmin) {
                    Ok(Some((vmax, vmin)))
                } else {
                    debug!("discarding extrema readings vmax={vmax} vmin={vmin}");
                    Ok(None)
                }
            }
            Err(err) if !self.measured_once => Err(err),
            Err(err) => {
                debug!("extrema read failed mid-scale: {err}");
                Ok(None)
            }
        }
    }
}

fn safe_get(scope: &mut Oscilloscope, ch: u32) -> Result<(f64, f64)> {
    Ok((scope.channel_scale(ch)?, scope.channel_offset(ch)?))
}

/// Apply a scale target and read back what the instrument actually took.
/// A refused write is fine; the readback is the truth. If even the readback
/// fails the previous values stand.
fn set_scale_resilient(
    scope: &mut Oscilloscope,
    ch: u32,
    target: f64,
    fallback: (f64, f64),
) -> (f64, f64) {
    if let Err(err) = scope.set_channel_scale(ch, target) {
        debug!("scale write {target} refused: {err}");
    }
    match safe_get(scope, ch) {
        Ok(pair) => pair,
        Err(_) => fallback,
    }
}

/// Request an offset; report whether the write was accepted plus the offset
/// the instrument actually holds afterwards.
fn try_set_offset(scope: &mut Oscilloscope, ch: u32, volts: f64, fallback: f64) -> (bool, f64) {
    let accepted = scope.set_channel_offset(ch, volts).is_ok();
    let readback = scope.channel_offset(ch).unwrap_or(fallback);
    (accepted, readback)
}

pub(crate) fn run(scope: &mut Oscilloscope, ch: u32, max_iters: u32) -> Result<(f64, f64)> {
    // Make sure the trace is visible at all.
    match scope.channel_enabled(ch) {
        Ok(Some(true)) => {}
        _ => scope.set_channel_enabled(ch, true)?,
    }

    let (mut vdiv, mut offs) = safe_get(scope, ch)?;
    let mut extrema = Extrema { measured_once: false };

    // Phase A: zoom out until both extrema are readable and on screen.
    // Offsets are left alone here.
    for _ in 0..max_iters {
        let zoom_factor = match extrema.read(scope, ch)? {
            None => 2.0,
            Some((vmax, vmin)) if fits_80(vmax, vmin, offs, vdiv) => break,
            Some(_) => 1.5,
        };
        let prev = vdiv;
        (vdiv, offs) = set_scale_resilient(scope, ch, snap125_up(vdiv * zoom_factor), (vdiv, offs));
        if step_floor(vdiv, prev) {
            break;
        }
    }

    let (vmax, vmin) = match extrema.read(scope, ch)? {
        Some(pair) => pair,
        // Signal never became measurable; report whatever the scope holds.
        None => return Ok(safe_get(scope, ch).unwrap_or((vdiv, offs))),
    };

    // Phase B: center on the midpoint, rounded to two significant digits so
    // the request stays within what front panels accept.
    let mid = round_sig2(0.5 * (vmax + vmin));
    let (accepted, readback) = try_set_offset(scope, ch, mid, offs);
    if accepted {
        offs = readback;
    }
    if !fits_80(vmax, vmin, offs, vdiv) {
        // One safety zoom-out; readability over tightness.
        let prev = vdiv;
        (vdiv, offs) = set_scale_resilient(scope, ch, snap125_up(vdiv * 1.5), (vdiv, offs));
        if step_floor(vdiv, prev) {
            return Ok((vdiv, offs));
        }
    }

    // Phase C: tighten one 1-2-5 step at a time, re-centering after each
    // step. The last configuration that still fits is kept; any refusal or
    // broken fit reverts to it and stops.
    let (mut best_vdiv, mut best_offs) = (vdiv, offs);
    for _ in 0..max_iters {
        let cand = snap125_down(vdiv / 1.5);
        if cand <= 0.0 {
            break;
        }
        let prev = vdiv;
        (vdiv, offs) = set_scale_resilient(scope, ch, cand, (vdiv, offs));
        if step_floor(vdiv, prev) {
            break;
        }

        let (accepted, readback) = try_set_offset(scope, ch, mid, offs);
        if accepted {
            offs = readback;
        }

        let keeps_fit = matches!(
            extrema.read(scope, ch)?,
            Some((vmax, vmin)) if fits_80(vmax, vmin, offs, vdiv)
        );
        if !keeps_fit || !accepted {
            set_scale_resilient(scope, ch, best_vdiv, (vdiv, offs));
            let _ = try_set_offset(scope, ch, best_offs, offs);
            let final_offs = scope.channel_offset(ch).unwrap_or(best_offs);
            debug!("autoscale reverting to {best_vdiv} V/div");
            return Ok((best_vdiv, final_offs));
        }
        (best_vdiv, best_offs) = (vdiv, offs);
    }

    Ok((best_vdiv, best_offs))
}
