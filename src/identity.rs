//! Parsed `*IDN?` identity.
//!
//! The response is a comma separated quadruple of manufacturer, model, serial
//! number and firmware revision. Instruments in the field sometimes omit the
//! trailing fields, so parsing is lenient and missing fields come back empty.

/// Identity record built from a raw `*IDN?` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Manufacturer field, trimmed.
    pub manufacturer: String,
    /// Model field, trimmed.
    pub model: String,
    /// Serial number field, trimmed.
    pub serial: String,
    /// Firmware revision field, trimmed.
    pub firmware: String,
    /// The full response line as received, trimmed.
    pub raw: String,
}

impl Identity {
    /// Split an `*IDN?` response into its fields. Never fails; short
    /// responses leave the remaining fields empty.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().to_string();
        let mut parts = raw.splitn(4, ',').map(|p| p.trim().to_string());
        Identity {
            manufacturer: parts.next().unwrap_or_default(),
            model: parts.next().unwrap_or_default(),
            serial: parts.next().unwrap_or_default(),
            firmware: parts.next().unwrap_or_default(),
            raw,
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.manufacturer, self.model)
    }
}
