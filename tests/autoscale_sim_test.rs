//! Autoscale behavior against a simulated oscilloscope.
//!
//! Run with: cargo test --test autoscale_sim_test

mod common;

use common::SimScope;
use labscpi::Oscilloscope;

fn scope_with(vdiv: f64, offset: f64, signal: (f64, f64)) -> (Oscilloscope, SimScope) {
    let sim = SimScope::new("ACME,SCOPE-1,0001,1.0", vdiv, offset, signal);
    let mut scope = Oscilloscope::connect(Box::new(sim.clone()));
    scope.initialize().unwrap();
    assert_eq!(scope.dialect_name(), Some("generic"));
    (scope, sim)
}

#[test]
fn full_screen_signal_keeps_its_scale() {
    // +-3 V at 1 V/div already sits inside the 80% window; any tighter
    // 1-2-5 step clips it, so autoscale must settle exactly where it began.
    let (mut scope, sim) = scope_with(1.0, 0.0, (-3.0, 3.0));
    let (vdiv, offset) = scope.autoscale_channel(1).unwrap();
    assert_eq!(vdiv, 1.0);
    assert_eq!(offset, 0.0);
    assert_eq!(sim.0.borrow().vdiv, 1.0);
}

#[test]
fn small_signal_is_tightened_to_best_fit() {
    // +-0.3 V: 0.1 V/div shows 0.32 V over 80% of the screen, the next
    // step down (0.05) clips. Expect refinement from 1.0 down to 0.1.
    let (mut scope, _sim) = scope_with(1.0, 0.0, (-0.3, 0.3));
    let (vdiv, offset) = scope.autoscale_channel(1).unwrap();
    assert!((vdiv - 0.1).abs() < 1e-12);
    assert_eq!(offset, 0.0);
}

#[test]
fn offset_signal_is_centered_on_its_midpoint() {
    // 1..2 V band starting clipped at 0.2 V/div: zoom out until readable,
    // center on 1.5 V, then tighten again.
    let (mut scope, sim) = scope_with(0.2, 0.0, (1.0, 2.0));
    let (vdiv, offset) = scope.autoscale_channel(1).unwrap();
    assert!((vdiv - 0.2).abs() < 1e-12);
    assert!((offset - 1.5).abs() < 1e-12);
    assert!((sim.0.borrow().offset - 1.5).abs() < 1e-12);
}

#[test]
fn flat_trace_stops_at_the_range_limit() {
    // A flat line never yields usable extrema; the zoom-out runs into the
    // simulated 10 V/div attenuator limit and reports what the scope holds.
    let (mut scope, _sim) = scope_with(1.0, 0.0, (0.5, 0.5));
    let (vdiv, offset) = scope.autoscale_channel(1).unwrap();
    assert_eq!(vdiv, 10.0);
    assert_eq!(offset, 0.0);
}

#[test]
fn autoscale_is_idempotent() {
    let (mut scope, _sim) = scope_with(1.0, 0.0, (-0.3, 0.3));
    let first = scope.autoscale_channel(1).unwrap();
    let second = scope.autoscale_channel(1).unwrap();
    assert_eq!(first, second);
}

#[test]
fn hidden_channel_is_enabled_first() {
    let sim = SimScope::new("ACME,SCOPE-1,0001,1.0", 1.0, 0.0, (-1.0, 1.0));
    sim.0.borrow_mut().enabled = false;
    let mut scope = Oscilloscope::connect(Box::new(sim.clone()));
    scope.initialize().unwrap();
    scope.autoscale_channel(1).unwrap();
    assert!(sim.0.borrow().enabled);
    assert!(sim.0.borrow().writes.iter().any(|w| w == ":CHAN1:DISP ON"));
}
