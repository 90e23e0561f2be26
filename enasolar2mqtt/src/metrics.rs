//! Conversion of inverter documents into publishable measurements.
//!
//! `meters.xml` reports instantaneous power as a decimal number. `data.xml`
//! reports energy counters as hexadecimal integers in hundredths of a kWh,
//! and the number of production days as a plain hexadecimal integer.

use std::fmt;

use log::warn;

use crate::document::ParsedDocument;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    Float(f64),
    Integer(i128),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Float(value) => value,
            MetricValue::Integer(value) => value as f64,
        }
    }
}

// Shortest round-trip digits, scientific below 1e-4 and from 1e16 on,
// exponent signed and at least two digits wide (`1e+16`, `1.5e-05`).
fn write_float(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_nan() {
        return f.write_str("nan");
    }
    if value.is_infinite() {
        return f.write_str(if value > 0.0 { "inf" } else { "-inf" });
    }

    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let scientific = format!("{value:e}");
        if let Some((mantissa, exponent)) = scientific.split_once('e') {
            if let Ok(exponent) = exponent.parse::<i32>() {
                let sign = if exponent < 0 { '-' } else { '+' };
                return write!(f, "{mantissa}e{sign}{:02}", exponent.abs());
            }
        }
        return f.write_str(&scientific);
    }

    // keep a fractional digit so consumers can tell floats from counters
    if value.fract() == 0.0 {
        write!(f, "{value:.1}")
    } else {
        write!(f, "{value}")
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MetricValue::Integer(value) => write!(f, "{value}"),
            MetricValue::Float(value) => write_float(f, value),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub name: &'static str,
    pub value: MetricValue,
}

impl Measurement {
    pub fn new(name: &'static str, value: MetricValue) -> Self {
        Self { name, value }
    }
}

enum Encoding {
    Decimal,
    /// Hex integer with two implied decimal digits.
    HexHundredths,
    Hex,
}

struct Rule {
    tag: &'static str,
    name: &'static str,
    encoding: Encoding,
}

const METER_RULES: &[Rule] = &[Rule {
    tag: "OutputPower",
    name: "outputpower",
    encoding: Encoding::Decimal,
}];

const ENERGY_RULES: &[Rule] = &[
    Rule {
        tag: "EnergyToday",
        name: "energytoday",
        encoding: Encoding::HexHundredths,
    },
    Rule {
        tag: "EnergyYesterday",
        name: "energyyesterday",
        encoding: Encoding::HexHundredths,
    },
    Rule {
        tag: "EnergyLifetime",
        name: "energylifetime",
        encoding: Encoding::HexHundredths,
    },
    Rule {
        tag: "DaysProducing",
        name: "daysproducing",
        encoding: Encoding::Hex,
    },
];

// Optional sign, then an optional 0x prefix.
fn parse_hex(text: &str) -> Option<i128> {
    let text = text.trim();
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let digits = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
        .unwrap_or(unsigned);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let value = i128::from_str_radix(digits, 16).ok()?;
    Some(if negative { -value } else { value })
}

fn decode(encoding: &Encoding, text: &str) -> Option<MetricValue> {
    match encoding {
        Encoding::Decimal => text.trim().parse::<f64>().ok().map(MetricValue::Float),
        Encoding::HexHundredths => {
            parse_hex(text).map(|value| MetricValue::Float(value as f64 / 100.))
        }
        Encoding::Hex => parse_hex(text).map(MetricValue::Integer),
    }
}

fn extract(doc: &ParsedDocument, rules: &[Rule]) -> Vec<Measurement> {
    doc.iter()
        .filter_map(|field| {
            let rule = rules.iter().find(|rule| rule.tag == field.tag)?;
            match decode(&rule.encoding, &field.text) {
                Some(value) => Some(Measurement::new(rule.name, value)),
                None => {
                    warn!("Unparsable {} value {:?}, skipping", field.tag, field.text);
                    None
                }
            }
        })
        .collect()
}

/// Readings from `meters.xml`.
pub fn extract_meters(doc: &ParsedDocument) -> Vec<Measurement> {
    extract(doc, METER_RULES)
}

/// Readings from `data.xml`.
pub fn extract_energy(doc: &ParsedDocument) -> Vec<Measurement> {
    extract(doc, ENERGY_RULES)
}
