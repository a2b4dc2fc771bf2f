use chrono::{Datelike, FixedOffset, Local, Timelike};
use tracing::debug;

use crate::models::parse_timestamp;

pub const NOT_AVAILABLE: &str = "N/A";
pub const NO_TIME: &str = "-";

const MONTHS_ID: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "Mei", "Jun", "Jul", "Agu", "Sep", "Okt", "Nov", "Des",
];
const MONTHS_EN: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Locales the dashboard knows how to render. Unknown tags fall back to
/// `Plain`, which uses no digit grouping and ISO-like dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayLocale {
    Indonesian,
    English,
    Plain,
}

impl DisplayLocale {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "id" | "id-id" => Self::Indonesian,
            "en" | "en-us" | "en-gb" => Self::English,
            other => {
                debug!(locale = other, "unsupported locale, using plain formatting");
                Self::Plain
            }
        }
    }

    fn separators(self) -> (Option<char>, char) {
        match self {
            Self::Indonesian => (Some('.'), ','),
            Self::English => (Some(','), '.'),
            Self::Plain => (None, '.'),
        }
    }
}

/// Stateless display formatting for one locale and UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct DisplayFormat {
    pub locale: DisplayLocale,
    pub offset: FixedOffset,
}

impl DisplayFormat {
    pub fn new(locale: DisplayLocale, offset: FixedOffset) -> Self {
        Self { locale, offset }
    }

    /// Uses the machine's current UTC offset.
    pub fn local(locale: DisplayLocale) -> Self {
        Self::new(locale, *Local::now().offset())
    }

    /// Integers render without decimals, fractional values with exactly
    /// `digits` decimals. Missing and NaN render as `N/A`.
    pub fn number(&self, value: Option<f64>, digits: usize) -> String {
        let Some(value) = value.filter(|v| v.is_finite()) else {
            return NOT_AVAILABLE.to_string();
        };
        let digits = if value.fract() == 0.0 { 0 } else { digits };
        let rendered = format!("{:.*}", digits, value.abs());
        let (int_part, frac_part) = match rendered.split_once('.') {
            Some((int_part, frac_part)) => (int_part, Some(frac_part)),
            None => (rendered.as_str(), None),
        };

        let (group, decimal) = self.locale.separators();
        let mut out = String::new();
        let is_zero = rendered.chars().all(|c| c == '0' || c == '.');
        if value < 0.0 && !is_zero {
            out.push('-');
        }
        out.push_str(&group_digits(int_part, group));
        if let Some(frac_part) = frac_part {
            out.push(decimal);
            out.push_str(frac_part);
        }
        out
    }

    /// Medium date with short time. Missing timestamps render `-`, unparseable
    /// ones are returned unchanged.
    pub fn timestamp(&self, raw: Option<&str>) -> String {
        let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
            return NO_TIME.to_string();
        };
        let Some(parsed) = parse_timestamp(raw) else {
            return raw.to_string();
        };
        let ts = parsed.with_timezone(&self.offset);
        let month = ts.month0() as usize;

        match self.locale {
            DisplayLocale::Indonesian => format!(
                "{} {} {}, {:02}.{:02}",
                ts.day(),
                MONTHS_ID[month],
                ts.year(),
                ts.hour(),
                ts.minute()
            ),
            DisplayLocale::English => {
                let (pm, hour) = ts.hour12();
                format!(
                    "{} {}, {}, {}:{:02} {}",
                    MONTHS_EN[month],
                    ts.day(),
                    ts.year(),
                    hour,
                    ts.minute(),
                    if pm { "PM" } else { "AM" }
                )
            }
            DisplayLocale::Plain => ts.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

fn group_digits(digits: &str, separator: Option<char>) -> String {
    let Some(separator) = separator else {
        return digits.to_string();
    };
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out
}
