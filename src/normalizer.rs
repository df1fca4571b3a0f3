//! Pack-size and price text normalization.
//!
//! Everything here is pure: the same text always yields the same answer, and text
//! that cannot be understood yields `None` rather than an error. Discrete packs
//! (pieces, bunches) parse fine but have no price per canonical unit.

use regex::{Captures, Regex};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::LazyLock;

const UNIT_PATTERN: &str = r"(kilograms?|kilos?|kgs?|grams?|gms?|gr|g|millilit(?:er|re)s?|ml|lit(?:er|re)s?|ltr|lt|l|pounds?|lbs?|ounces?|oz|كجم|كيلو|كغ|جرام|غرام|جم|غ|ملل|مل|لتر)";
const DISCRETE_PATTERN: &str = r"\b(pieces?|pcs?|each|bunch(?:es)?|pack|قطعة|قطع|حبة|ربطة|حزمة)\b";
const NUMBER_PATTERN: &str = r"(\d+(?:\.\d+)?)";

static SHARED: LazyLock<UnitNormalizer> = LazyLock::new(UnitNormalizer::new);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PackUnit {
    Kilogram,
    Gram,
    Liter,
    Milliliter,
    Pound,
    Ounce,
    Piece,
}

impl PackUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackUnit::Kilogram => "kg",
            PackUnit::Gram => "g",
            PackUnit::Liter => "l",
            PackUnit::Milliliter => "ml",
            PackUnit::Pound => "lb",
            PackUnit::Ounce => "oz",
            PackUnit::Piece => "piece",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        let unit = match token {
            "kilogram" | "kilograms" | "kilo" | "kilos" | "kg" | "kgs" | "كجم" | "كيلو" | "كغ" => {
                PackUnit::Kilogram
            }
            "gram" | "grams" | "gm" | "gms" | "gr" | "g" | "جرام" | "غرام" | "جم" | "غ" => {
                PackUnit::Gram
            }
            "milliliter" | "milliliters" | "millilitre" | "millilitres" | "ml" | "ملل" | "مل" => {
                PackUnit::Milliliter
            }
            "liter" | "liters" | "litre" | "litres" | "ltr" | "lt" | "l" | "لتر" => PackUnit::Liter,
            "pound" | "pounds" | "lb" | "lbs" => PackUnit::Pound,
            "ounce" | "ounces" | "oz" => PackUnit::Ounce,
            _ => return None,
        };
        Some(unit)
    }

    /// Factor to the canonical unit, or `None` for discrete units.
    fn canonical(&self) -> Option<(Decimal, CanonicalUnit)> {
        match self {
            PackUnit::Kilogram => Some((Decimal::ONE, CanonicalUnit::Kilogram)),
            PackUnit::Gram => Some((Decimal::new(1, 3), CanonicalUnit::Kilogram)),
            PackUnit::Pound => Some((Decimal::new(453592, 6), CanonicalUnit::Kilogram)),
            PackUnit::Ounce => Some((Decimal::new(283495, 7), CanonicalUnit::Kilogram)),
            PackUnit::Liter => Some((Decimal::ONE, CanonicalUnit::Liter)),
            PackUnit::Milliliter => Some((Decimal::new(1, 3), CanonicalUnit::Liter)),
            PackUnit::Piece => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalUnit {
    Kilogram,
    Liter,
}

/// A parsed pack: `count` items of `quantity` `unit` each.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackSize {
    pub count: u32,
    pub quantity: Decimal,
    pub unit: PackUnit,
}

impl PackSize {
    /// `None` when the product overflows.
    pub fn total_quantity(&self) -> Option<Decimal> {
        self.quantity.checked_mul(Decimal::from(self.count))
    }

    /// Price per kilogram or liter, rounded to two places.
    pub fn unit_price(&self, price: Decimal) -> Option<UnitPrice> {
        if price <= Decimal::ZERO {
            return None;
        }
        let (factor, per) = self.unit.canonical()?;
        let canonical_quantity = self.total_quantity()?.checked_mul(factor)?;
        if canonical_quantity <= Decimal::ZERO {
            return None;
        }
        let value = price.checked_div(canonical_quantity)?.round_dp(2);
        Some(UnitPrice { value, per })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitPrice {
    pub value: Decimal,
    pub per: CanonicalUnit,
}

pub struct UnitNormalizer {
    multipack_regex: Regex,
    reverse_multipack_regex: Regex,
    measure_regex: Regex,
    pack_of_regex: Regex,
    discrete_regex: Regex,
    counted_discrete_regex: Regex,
    price_regex: Regex,
    decimal_comma_regex: Regex,
    thousands_comma_regex: Regex,
}

impl Default for UnitNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitNormalizer {
    pub fn new() -> Self {
        let sep = r"\s*[x×*]\s*";
        let unit_end = r"(?:\b|$)";
        Self {
            multipack_regex: Regex::new(&format!(
                r"(\d+){sep}{NUMBER_PATTERN}\s*{UNIT_PATTERN}{unit_end}"
            ))
            .expect("multipack pattern is valid"),
            reverse_multipack_regex: Regex::new(&format!(
                r"{NUMBER_PATTERN}\s*{UNIT_PATTERN}{sep}(\d+)\b"
            ))
            .expect("reverse multipack pattern is valid"),
            measure_regex: Regex::new(&format!(r"{NUMBER_PATTERN}\s*{UNIT_PATTERN}{unit_end}"))
                .expect("measure pattern is valid"),
            pack_of_regex: Regex::new(r"\bpack of\s*(\d+)\b").expect("pack-of pattern is valid"),
            discrete_regex: Regex::new(DISCRETE_PATTERN).expect("discrete pattern is valid"),
            counted_discrete_regex: Regex::new(&format!(r"(\d+)\s*{DISCRETE_PATTERN}"))
                .expect("counted discrete pattern is valid"),
            price_regex: Regex::new(r"\d[\d.,]*").expect("price pattern is valid"),
            decimal_comma_regex: Regex::new(r"(\d),(\d{1,2})\b").expect("decimal comma pattern is valid"),
            thousands_comma_regex: Regex::new(r"(\d),(\d{3})").expect("thousands pattern is valid"),
        }
    }

    pub fn parse_pack(&self, text: &str) -> Option<PackSize> {
        let prepared = prepare(text);
        let prepared = self.decimal_comma_regex.replace_all(&prepared, "$1.$2");
        let prepared = self.thousands_comma_regex.replace_all(&prepared, "$1$2");
        let text = prepared.trim();
        if text.is_empty() {
            return None;
        }

        if let Some(caps) = self.multipack_regex.captures(text) {
            return pack_from(&caps, 1, 2, 3);
        }
        if let Some(caps) = self.reverse_multipack_regex.captures(text) {
            return pack_from(&caps, 3, 1, 2);
        }
        if let Some(caps) = self.measure_regex.captures(text) {
            let quantity = Decimal::from_str(caps.get(1)?.as_str()).ok()?;
            let unit = PackUnit::from_token(caps.get(2)?.as_str())?;
            return measured(1, quantity, unit);
        }
        if let Some(caps) = self.pack_of_regex.captures(text) {
            return pieces(caps.get(1)?.as_str());
        }
        if let Some(caps) = self.counted_discrete_regex.captures(text) {
            return pieces(caps.get(1)?.as_str());
        }
        if self.discrete_regex.is_match(text) {
            return pieces("1");
        }
        None
    }

    pub fn normalize(&self, pack_text: &str, price: Decimal) -> Option<UnitPrice> {
        self.parse_pack(pack_text)?.unit_price(price)
    }

    /// Pulls the first number out of price text like "EGP 1,234.50" or "12,50 ج.م".
    pub fn parse_price(&self, text: &str) -> Option<Decimal> {
        let text = prepare(text);
        let token = self.price_regex.find(&text)?.as_str();
        let token = token.trim_end_matches(['.', ',']);
        Decimal::from_str(&resolve_separators(token)).ok()
    }
}

pub fn parse_pack(text: &str) -> Option<PackSize> {
    SHARED.parse_pack(text)
}

pub fn normalize(pack_text: &str, price: Decimal) -> Option<UnitPrice> {
    SHARED.normalize(pack_text, price)
}

pub fn parse_price(text: &str) -> Option<Decimal> {
    SHARED.parse_price(text)
}

// Lowercases, folds Arabic-Indic digits and turns decimal commas inside numbers into dots.
fn prepare(text: &str) -> String {
    text
        .chars()
        .map(|c| match c {
            '\u{0660}'..='\u{0669}' => char::from(b'0' + (c as u32 - 0x0660) as u8),
            '\u{06F0}'..='\u{06F9}' => char::from(b'0' + (c as u32 - 0x06F0) as u8),
            '\u{066B}' => '.',
            '\u{066C}' => ',',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

fn resolve_separators(token: &str) -> String {
    let commas = token.matches(',').count();
    let dots = token.matches('.').count();

    match (commas, dots) {
        (0, 0) | (0, 1) => token.to_string(),
        (_, 0) => {
            // A single comma followed by one or two digits is a decimal comma.
            let tail = token.rsplit(',').next().unwrap_or_default();
            if commas == 1 && (1..=2).contains(&tail.len()) {
                token.replace(',', ".")
            } else {
                token.replace(',', "")
            }
        }
        (0, _) => {
            let tail = token.rsplit('.').next().unwrap_or_default();
            if tail.len() == 3 {
                token.replace('.', "")
            } else {
                join_all_but_last(token, '.')
            }
        }
        _ => {
            // Whichever separator comes last is the decimal point.
            let last_comma = token.rfind(',').unwrap_or(0);
            let last_dot = token.rfind('.').unwrap_or(0);
            if last_comma > last_dot {
                token.replace('.', "").replace(',', ".")
            } else {
                token.replace(',', "")
            }
        }
    }
}

fn join_all_but_last(token: &str, separator: char) -> String {
    match token.rfind(separator) {
        Some(idx) => {
            let (head, tail) = token.split_at(idx);
            format!("{}{}", head.replace(separator, ""), tail)
        }
        None => token.to_string(),
    }
}

fn pack_from(caps: &Captures<'_>, count: usize, quantity: usize, unit: usize) -> Option<PackSize> {
    let count = caps.get(count)?.as_str().parse::<u32>().ok()?;
    let quantity = Decimal::from_str(caps.get(quantity)?.as_str()).ok()?;
    let unit = PackUnit::from_token(caps.get(unit)?.as_str())?;
    measured(count, quantity, unit)
}

fn measured(count: u32, quantity: Decimal, unit: PackUnit) -> Option<PackSize> {
    if count == 0 || quantity <= Decimal::ZERO {
        return None;
    }
    Some(PackSize {
        count,
        quantity,
        unit,
    })
}

fn pieces(count: &str) -> Option<PackSize> {
    let count = count.parse::<u32>().ok()?;
    measured(count, Decimal::ONE, PackUnit::Piece)
}
