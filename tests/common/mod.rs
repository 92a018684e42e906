//! Simulated instrument transports shared by the integration tests.
//!
//! Each sim answers the protocol-level queries every checked session emits
//! (`*IDN?`, `*OPC?`, `SYST:ERR?`) plus a small slice of instrument state,
//! so the facades run against them with full error checking enabled.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use labscpi::Transport;

fn timeout_err(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, what.to_string())
}

/// Value a scope measurement reports when the trace is clipped off screen.
pub const CLIPPED: f64 = 9.9e37;

// ---------------------------------------------------------------------------
// map-scripted transport
// ---------------------------------------------------------------------------

/// Fixed request/reply transport for exercising exact command shapes.
#[derive(Default)]
pub struct Scripted {
    pub idn: String,
    pub replies: HashMap<String, String>,
    pub writes: Vec<String>,
    pub refuse: Vec<String>,
}

/// Cloneable handle kept by the test after the box goes to the facade.
#[derive(Clone)]
pub struct SharedScripted(pub Rc<RefCell<Scripted>>);

impl SharedScripted {
    pub fn new(idn: &str) -> Self {
        SharedScripted(Rc::new(RefCell::new(Scripted {
            idn: idn.to_string(),
            ..Scripted::default()
        })))
    }

    pub fn reply(&self, cmd: &str, resp: &str) -> &Self {
        self.0
            .borrow_mut()
            .replies
            .insert(cmd.to_string(), resp.to_string());
        self
    }

    pub fn refuse(&self, cmd: &str) -> &Self {
        self.0.borrow_mut().refuse.push(cmd.to_string());
        self
    }

    pub fn wrote(&self, cmd: &str) -> bool {
        self.0.borrow().writes.iter().any(|w| w == cmd)
    }
}

impl Transport for SharedScripted {
    fn write(&mut self, cmd: &str) -> io::Result<()> {
        let mut t = self.0.borrow_mut();
        if t.refuse.iter().any(|c| c == cmd) {
            return Err(timeout_err("refused write"));
        }
        t.writes.push(cmd.to_string());
        Ok(())
    }

    fn query(&mut self, cmd: &str) -> io::Result<String> {
        self.0.borrow_mut().writes.push(cmd.to_string());
        let t = self.0.borrow();
        if cmd == "*IDN?" {
            return Ok(t.idn.clone());
        }
        if cmd == "*OPC?" {
            return Ok("1".to_string());
        }
        if cmd.contains("ERR") {
            return Ok("0,\"No error\"".to_string());
        }
        t.replies
            .get(cmd)
            .cloned()
            .ok_or_else(|| timeout_err("no scripted reply"))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(2)
    }

    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// simulated oscilloscope
// ---------------------------------------------------------------------------

/// Per-channel vertical state plus a fixed signal under test.
pub struct ScopeState {
    pub idn: String,
    pub vdiv: f64,
    pub offset: f64,
    pub enabled: bool,
    /// True signal extremes in volts.
    pub signal: (f64, f64),
    pub writes: Vec<String>,
}

/// Single-channel scope model. Measurements report [`CLIPPED`] whenever the
/// corresponding extreme sits outside the 8-division screen.
#[derive(Clone)]
pub struct SimScope(pub Rc<RefCell<ScopeState>>);

impl SimScope {
    pub fn new(idn: &str, vdiv: f64, offset: f64, signal: (f64, f64)) -> Self {
        SimScope(Rc::new(RefCell::new(ScopeState {
            idn: idn.to_string(),
            vdiv,
            offset,
            enabled: true,
            signal,
            writes: Vec::new(),
        })))
    }

    fn visible(&self, v: f64) -> bool {
        let t = self.0.borrow();
        (v - t.offset).abs() <= 4.0 * t.vdiv
    }

    fn num_arg(cmd: &str) -> io::Result<f64> {
        cmd.split_whitespace()
            .last()
            .and_then(|a| a.parse().ok())
            .ok_or_else(|| timeout_err("bad numeric argument"))
    }
}

impl Transport for SimScope {
    fn write(&mut self, cmd: &str) -> io::Result<()> {
        self.0.borrow_mut().writes.push(cmd.to_string());
        if cmd.starts_with(":CHAN1:SCAL ") {
            // real front ends clamp at their attenuator range
            self.0.borrow_mut().vdiv = Self::num_arg(cmd)?.clamp(1e-3, 10.0);
        } else if cmd.starts_with(":CHAN1:OFFS ") {
            self.0.borrow_mut().offset = Self::num_arg(cmd)?;
        } else if cmd.starts_with(":CHAN1:DISP ") {
            let on = cmd.ends_with("ON") || cmd.ends_with('1');
            self.0.borrow_mut().enabled = on;
        }
        Ok(())
    }

    fn query(&mut self, cmd: &str) -> io::Result<String> {
        self.0.borrow_mut().writes.push(cmd.to_string());
        if cmd == "*IDN?" {
            return Ok(self.0.borrow().idn.clone());
        }
        if cmd == "*OPC?" {
            return Ok("1".to_string());
        }
        if cmd.contains("ERR") {
            return Ok("0,\"No error\"".to_string());
        }
        if cmd == ":CHAN1:DISP?" {
            return Ok(if self.0.borrow().enabled { "1" } else { "0" }.to_string());
        }
        if cmd == ":CHAN1:SCAL?" {
            return Ok(format!("{}", self.0.borrow().vdiv));
        }
        if cmd == ":CHAN1:OFFS?" {
            return Ok(format!("{}", self.0.borrow().offset));
        }
        if cmd.starts_with(":MEAS:ITEM? VMAX,CHAN1") {
            let v = self.0.borrow().signal.1;
            return Ok(format!("{}", if self.visible(v) { v } else { CLIPPED }));
        }
        if cmd.starts_with(":MEAS:ITEM? VMIN,CHAN1") {
            let v = self.0.borrow().signal.0;
            return Ok(format!("{}", if self.visible(v) { v } else { CLIPPED }));
        }
        Err(timeout_err("unrecognized scope query"))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(2)
    }

    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// simulated power supply
// ---------------------------------------------------------------------------

pub struct PsuState {
    pub idn: String,
    pub channels: u32,
    pub selected: u32,
    pub voltage: HashMap<u32, f64>,
    pub current: HashMap<u32, f64>,
    pub output: HashMap<u32, bool>,
    pub writes: Vec<String>,
}

/// Multi-channel SCPI supply honoring `INST:NSEL` and the `SOUR`/`OUTP`
/// command tree. Measurements report the setpoint with a small droop.
#[derive(Clone)]
pub struct SimPsu(pub Rc<RefCell<PsuState>>);

impl SimPsu {
    pub fn new(idn: &str, channels: u32) -> Self {
        SimPsu(Rc::new(RefCell::new(PsuState {
            idn: idn.to_string(),
            channels,
            selected: 1,
            voltage: HashMap::new(),
            current: HashMap::new(),
            output: HashMap::new(),
            writes: Vec::new(),
        })))
    }

    fn num_arg(cmd: &str) -> io::Result<f64> {
        cmd.split_whitespace()
            .last()
            .and_then(|a| a.parse().ok())
            .ok_or_else(|| timeout_err("bad numeric argument"))
    }
}

impl Transport for SimPsu {
    fn write(&mut self, cmd: &str) -> io::Result<()> {
        let mut t = self.0.borrow_mut();
        t.writes.push(cmd.to_string());
        if let Some(arg) = cmd.strip_prefix("INST:NSEL ") {
            let ch: u32 = arg.trim().parse().map_err(|_| timeout_err("bad channel"))?;
            if ch < 1 || ch > t.channels {
                return Err(timeout_err("no such channel"));
            }
            t.selected = ch;
        } else if cmd.starts_with("SOUR:VOLT ") {
            let ch = t.selected;
            let v = Self::num_arg(cmd)?;
            t.voltage.insert(ch, v);
        } else if cmd.starts_with("SOUR:CURR:") {
            // no protection subtree on this model
            return Err(timeout_err("undefined header"));
        } else if cmd.starts_with("SOUR:CURR ") {
            if cmd.ends_with("MAX") {
                let ch = t.selected;
                t.current.insert(ch, 3.0);
            } else {
                let ch = t.selected;
                let v = Self::num_arg(cmd)?;
                t.current.insert(ch, v);
            }
        } else if cmd == "OUTP ON" || cmd == "OUTP OFF" {
            let ch = t.selected;
            let on = cmd.ends_with("ON");
            t.output.insert(ch, on);
        }
        Ok(())
    }

    fn query(&mut self, cmd: &str) -> io::Result<String> {
        self.0.borrow_mut().writes.push(cmd.to_string());
        let t = self.0.borrow();
        match cmd {
            "*IDN?" => Ok(t.idn.clone()),
            "*OPC?" => Ok("1".to_string()),
            _ if cmd.contains("ERR") => Ok("0,\"No error\"".to_string()),
            "SOUR:VOLT?" => Ok(format!("{}", t.voltage.get(&t.selected).copied().unwrap_or(0.0))),
            "SOUR:CURR?" => Ok(format!("{}", t.current.get(&t.selected).copied().unwrap_or(0.0))),
            "MEAS:VOLT?" => Ok(format!(
                "{:.4}",
                t.voltage.get(&t.selected).copied().unwrap_or(0.0) * 0.999
            )),
            "MEAS:CURR?" => Ok(format!(
                "{:.4}",
                t.current.get(&t.selected).copied().unwrap_or(0.0) * 0.98
            )),
            "OUTP?" => Ok(if t.output.get(&t.selected).copied().unwrap_or(false) {
                "1"
            } else {
                "0"
            }
            .to_string()),
            _ => Err(timeout_err("unrecognized psu query")),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(2)
    }

    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// simulated electronic load
// ---------------------------------------------------------------------------

pub struct LoadState {
    pub idn: String,
    pub current: f64,
    pub input: bool,
    pub locked: bool,
    pub writes: Vec<String>,
}

/// Single-channel load with a panel lock, modeled on the EA EL series.
#[derive(Clone)]
pub struct SimLoad(pub Rc<RefCell<LoadState>>);

impl SimLoad {
    pub fn new(idn: &str) -> Self {
        SimLoad(Rc::new(RefCell::new(LoadState {
            idn: idn.to_string(),
            current: 0.0,
            input: false,
            locked: false,
            writes: Vec::new(),
        })))
    }
}

impl Transport for SimLoad {
    fn write(&mut self, cmd: &str) -> io::Result<()> {
        let mut t = self.0.borrow_mut();
        t.writes.push(cmd.to_string());
        if let Some(arg) = cmd.strip_prefix("SOUR:CURR ") {
            t.current = arg.trim().parse().map_err(|_| timeout_err("bad argument"))?;
        } else if cmd == "INP ON" || cmd == "INP OFF" {
            t.input = cmd.ends_with("ON");
        } else if let Some(arg) = cmd.strip_prefix("SYST:LOCK ") {
            t.locked = arg.trim() == "1";
        } else if cmd.starts_with("INST:") {
            return Err(timeout_err("single channel"));
        }
        Ok(())
    }

    fn query(&mut self, cmd: &str) -> io::Result<String> {
        self.0.borrow_mut().writes.push(cmd.to_string());
        let t = self.0.borrow();
        match cmd {
            "*IDN?" => Ok(t.idn.clone()),
            "*OPC?" => Ok("1".to_string()),
            _ if cmd.contains("ERR") => Ok("0,\"No error\"".to_string()),
            "INP?" => Ok(if t.input { "1" } else { "0" }.to_string()),
            "MEAS:CURR?" => Ok(format!("{:.4}", t.current)),
            "MEAS:VOLT?" => Ok("12.0".to_string()),
            _ => Err(timeout_err("unrecognized load query")),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(2)
    }

    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}
