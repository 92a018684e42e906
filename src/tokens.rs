//! Vendor token vocabulary.
//!
//! Instrument families share abstract token keys (measurement kinds, math
//! operators, channel units, trigger sweep modes) while each vendor spells
//! them differently on the wire. A [`TokenTable`] holds the base spelling per
//! family plus per-dialect overrides layered on top; every table also keeps a
//! reverse map so responses can be folded back to the abstract key.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, ScpiError};

/// Token families a dialect may translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenFamily {
    /// Vertical channel units (volts, amps).
    ChannelUnit,
    /// Automatic measurement kinds.
    Measure,
    /// Trigger sweep modes.
    TriggerSweep,
    /// Math/function operators.
    Math,
    /// Channel input coupling.
    Coupling,
}

impl fmt::Display for TokenFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenFamily::ChannelUnit => "channel unit",
            TokenFamily::Measure => "measure",
            TokenFamily::TriggerSweep => "trigger sweep",
            TokenFamily::Math => "math operator",
            TokenFamily::Coupling => "coupling",
        };
        f.write_str(name)
    }
}

/// Vertical channel unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelUnit {
    /// Voltage probe.
    Volt,
    /// Current probe.
    Amp,
}

impl ChannelUnit {
    /// Abstract token key.
    pub fn key(self) -> &'static str {
        match self {
            ChannelUnit::Volt => "VOLT",
            ChannelUnit::Amp => "AMP",
        }
    }
}

/// Trigger sweep mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSweepMode {
    /// Free-running acquisition.
    Auto,
    /// Acquire only on trigger.
    Normal,
    /// One acquisition then stop.
    Single,
}

impl TriggerSweepMode {
    /// Abstract token key.
    pub fn key(self) -> &'static str {
        match self {
            TriggerSweepMode::Auto => "AUTO",
            TriggerSweepMode::Normal => "NORM",
            TriggerSweepMode::Single => "SINGLE",
        }
    }
}

/// Edge trigger slope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slope {
    /// Rising edge.
    Positive,
    /// Falling edge.
    Negative,
}

impl Slope {
    /// Wire token.
    pub fn token(self) -> &'static str {
        match self {
            Slope::Positive => "POS",
            Slope::Negative => "NEG",
        }
    }
}

/// Automatic measurement kinds. Two-signal kinds ([`Measure::Phase`],
/// [`Measure::Delay`]) take a second source; see [`Measure::arity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    /// Peak-to-peak voltage.
    Vpp,
    /// Maximum voltage.
    Vmax,
    /// Minimum voltage.
    Vmin,
    /// Top (flat high) level.
    Top,
    /// Base (flat low) level.
    Base,
    /// Average level.
    Average,
    /// RMS level.
    Rms,
    /// Frequency.
    Frequency,
    /// Period.
    Period,
    /// Rise time.
    RiseTime,
    /// Fall time.
    FallTime,
    /// Positive duty cycle.
    PositiveDuty,
    /// Negative duty cycle.
    NegativeDuty,
    /// Positive pulse width.
    PositiveWidth,
    /// Negative pulse width.
    NegativeWidth,
    /// Phase between two sources.
    Phase,
    /// Delay between two sources.
    Delay,
}

impl Measure {
    /// Abstract token key.
    pub fn key(self) -> &'static str {
        match self {
            Measure::Vpp => "VPP",
            Measure::Vmax => "VMAX",
            Measure::Vmin => "VMIN",
            Measure::Top => "TOP",
            Measure::Base => "BASE",
            Measure::Average => "AVG",
            Measure::Rms => "RMS",
            Measure::Frequency => "FREQ",
            Measure::Period => "PERIOD",
            Measure::RiseTime => "RISE",
            Measure::FallTime => "FALL",
            Measure::PositiveDuty => "PDUTY",
            Measure::NegativeDuty => "NDUTY",
            Measure::PositiveWidth => "PWID",
            Measure::NegativeWidth => "NWID",
            Measure::Phase => "PHASE",
            Measure::Delay => "DELAY",
        }
    }

    /// Number of signal sources the measurement consumes. Keyed on the
    /// abstract kind, not the vendor spelling, so every dialect agrees.
    pub fn arity(self) -> u8 {
        match self {
            Measure::Phase | Measure::Delay => 2,
            _ => 1,
        }
    }
}

/// Math/function operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum MathOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Integrate,
    Differentiate,
    Fft,
    FftPhase,
    Sqrt,
    Magnify,
    Absolute,
    Square,
    Ln,
    Log,
    Exp,
    Ten,
    LowPass,
    HighPass,
    BandPass,
    Average,
    Linear,
    Maximum,
    Minimum,
    Peak,
    MaxHold,
    MinHold,
    Trend,
    BusTiming,
    BusState,
    SerialChart,
}

impl MathOperator {
    /// Abstract token key.
    pub fn key(self) -> &'static str {
        match self {
            MathOperator::Add => "ADD",
            MathOperator::Subtract => "SUBTRACT",
            MathOperator::Multiply => "MULTIPLY",
            MathOperator::Divide => "DIVIDE",
            MathOperator::Integrate => "INTEGRATE",
            MathOperator::Differentiate => "DIFFERENTIATE",
            MathOperator::Fft => "FFT",
            MathOperator::FftPhase => "FFT_PHASE",
            MathOperator::Sqrt => "SQRT",
            MathOperator::Magnify => "MAGNIFY",
            MathOperator::Absolute => "ABSOLUTE",
            MathOperator::Square => "SQUARE",
            MathOperator::Ln => "LN",
            MathOperator::Log => "LOG",
            MathOperator::Exp => "EXP",
            MathOperator::Ten => "TEN",
            MathOperator::LowPass => "LOWPASS",
            MathOperator::HighPass => "HIGHPASS",
            MathOperator::BandPass => "BANDPASS",
            MathOperator::Average => "AVERAGE",
            MathOperator::Linear => "LINEAR",
            MathOperator::Maximum => "MAXIMUM",
            MathOperator::Minimum => "MINIMUM",
            MathOperator::Peak => "PEAK",
            MathOperator::MaxHold => "MAXHOLD",
            MathOperator::MinHold => "MINHOLD",
            MathOperator::Trend => "TREND",
            MathOperator::BusTiming => "BTIMING",
            MathOperator::BusState => "BSTATE",
            MathOperator::SerialChart => "SERCHART",
        }
    }
}

type Pairs = &'static [(&'static str, &'static str)];

const BASE_CHANNEL_UNIT: Pairs = &[("VOLT", "VOLT"), ("AMP", "AMP")];

const BASE_MEASURE: Pairs = &[
    ("VPP", "VPP"),
    ("VMAX", "VMAX"),
    ("VMIN", "VMIN"),
    ("TOP", "TOP"),
    ("BASE", "BASE"),
    ("AVG", "AVER"),
    ("RMS", "RMS"),
    ("FREQ", "FREQ"),
    ("PERIOD", "PER"),
    ("RISE", "RIS"),
    ("FALL", "FALL"),
    ("PDUTY", "PDUT"),
    ("NDUTY", "NDUT"),
    ("PWID", "PWID"),
    ("NWID", "NWID"),
    ("PHASE", "PHASE"),
    ("DELAY", "DEL"),
];

const BASE_TRIGGER_SWEEP: Pairs = &[("AUTO", "AUTO"), ("NORM", "NORM"), ("SINGLE", "SINGLE")];

const BASE_MATH: Pairs = &[
    ("ADD", "ADD"),
    ("SUBTRACT", "SUBTract"),
    ("MULTIPLY", "MULTiply"),
    ("DIVIDE", "DIVide"),
    ("INTEGRATE", "INTegrate"),
    ("DIFFERENTIATE", "DIFF"),
    ("FFT", "FFT"),
    ("FFT_PHASE", "FFTPhase"),
    ("SQRT", "SQRT"),
    ("MAGNIFY", "MAGNify"),
    ("ABSOLUTE", "ABSolute"),
    ("SQUARE", "SQUare"),
    ("LN", "LN"),
    ("LOG", "LOG"),
    ("EXP", "EXP"),
    ("TEN", "TEN"),
    ("LOWPASS", "LOWPass"),
    ("HIGHPASS", "HIGHpass"),
    ("BANDPASS", "BANDpass"),
    ("AVERAGE", "AVERage"),
    ("LINEAR", "LINear"),
    ("MAXIMUM", "MAXimum"),
    ("MINIMUM", "MINimum"),
    ("PEAK", "PEAK"),
    ("MAXHOLD", "MAXHold"),
    ("MINHOLD", "MINHold"),
    ("TREND", "TRENd"),
    ("BTIMING", "BTIMing"),
    ("BSTATE", "BSTate"),
    ("SERCHART", "SERChart"),
];

const BASE_COUPLING: Pairs = &[("DC", "DC"), ("AC", "AC"), ("GND", "GND")];

struct Family {
    forward: HashMap<&'static str, &'static str>,
    reverse: HashMap<String, &'static str>,
}

/// Layered token table: base vocabulary plus per-dialect overrides.
pub struct TokenTable {
    families: HashMap<TokenFamily, Family>,
}

impl TokenTable {
    /// Base vocabulary with no vendor overrides.
    pub fn base() -> Result<Self> {
        TokenTable::with_overrides(&[])
    }

    /// Build a table from the base vocabulary with `overrides` layered on
    /// top. Keys missing from an override fall through to the base spelling.
    /// Fails if any family ends up mapping two keys to the same vendor token,
    /// which would make responses ambiguous to fold back.
    pub fn with_overrides(overrides: &[(TokenFamily, Pairs)]) -> Result<Self> {
        let mut families = HashMap::new();
        for (family, base) in [
            (TokenFamily::ChannelUnit, BASE_CHANNEL_UNIT),
            (TokenFamily::Measure, BASE_MEASURE),
            (TokenFamily::TriggerSweep, BASE_TRIGGER_SWEEP),
            (TokenFamily::Math, BASE_MATH),
            (TokenFamily::Coupling, BASE_COUPLING),
        ] {
            let mut forward: HashMap<&'static str, &'static str> =
                base.iter().copied().collect();
            for (fam, pairs) in overrides {
                if *fam != family {
                    continue;
                }
                for (key, token) in pairs.iter() {
                    forward.insert(key, token);
                }
            }
            let mut reverse = HashMap::with_capacity(forward.len());
            for (key, token) in &forward {
                if reverse.insert(token.to_uppercase(), *key).is_some() {
                    return Err(ScpiError::Parse(format!(
                        "{family} table maps two keys to vendor token {token:?}"
                    )));
                }
            }
            families.insert(family, Family { forward, reverse });
        }
        Ok(TokenTable { families })
    }

    fn family(&self, family: TokenFamily) -> Result<&Family> {
        self.families
            .get(&family)
            .ok_or_else(|| ScpiError::Unsupported(format!("no {family} token family")))
    }

    /// Strict key-to-vendor translation. An unknown key is an unsupported
    /// request, the instrument never sees it.
    pub fn token(&self, family: TokenFamily, key: &str) -> Result<&'static str> {
        let upper = key.trim().to_uppercase();
        self.family(family)?
            .forward
            .get(upper.as_str())
            .copied()
            .ok_or_else(|| ScpiError::Unsupported(format!("unknown {family} token: {key:?}")))
    }

    /// Lenient translation for families where unknown spellings should pass
    /// through unchanged (uppercased) rather than fail.
    pub fn token_lenient(&self, family: TokenFamily, key: &str) -> String {
        let upper = key.trim().to_uppercase();
        match self.families.get(&family).and_then(|f| f.forward.get(upper.as_str())) {
            Some(token) => (*token).to_string(),
            None => upper,
        }
    }

    /// Fold a vendor response token back to its abstract key. Unknown tokens
    /// pass through trimmed, so callers still see what the instrument said.
    pub fn untoken(&self, family: TokenFamily, vendor: &str) -> String {
        let trimmed = vendor.trim();
        match self
            .families
            .get(&family)
            .and_then(|f| f.reverse.get(&trimmed.to_uppercase()))
        {
            Some(key) => (*key).to_string(),
            None => trimmed.to_string(),
        }
    }
}
