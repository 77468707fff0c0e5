//! German decimal notation as typed into the calculation forms
//!
//! Amounts arrive as `"1.234,56"`, `"100,00"`, `"12.5"` or as plain JSON numbers.

use serde::{Deserialize, Serialize};

/// A numeric form value, either already a number or text in German notation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecimalInput {
    Number(f64),
    Text(String),
}

impl DecimalInput {
    /// normalized value, `None` for empty or unparsable input
    pub fn value(&self) -> Option<f64> {
        match self {
            DecimalInput::Number(n) if n.is_finite() => Some(*n),
            DecimalInput::Number(_) => None,
            DecimalInput::Text(s) => parse_german(s),
        }
    }
}

impl From<f64> for DecimalInput {
    fn from(n: f64) -> Self {
        DecimalInput::Number(n)
    }
}

impl From<&str> for DecimalInput {
    fn from(s: &str) -> Self {
        DecimalInput::Text(s.to_owned())
    }
}

/// Parse `1.234,56` style numbers
///
/// When a comma is present it is the decimal separator and dots are thousands
/// separators. Without a comma the text is read as a plain decimal, so `12.5` stays 12.5.
pub fn parse_german(text: &str) -> Option<f64> {
    let text = text.trim().replace(' ', "").replace('\u{a0}', "");
    if text.is_empty() {
        return None;
    }
    let normalized = if text.contains(',') {
        text.replace('.', "").replacen(',', ".", 1)
    } else {
        text
    };
    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}
