//! Type recognizers for format-aware aggregation.
//!
//! Each recognizer decides whether a value/format pair belongs to its type and
//! supplies the canonical token. The built-in registry checks, in order:
//!
//! | Recognizer | Token |
//! |------------|-------|
//! | Date       | `yyyy-mm-dd` |
//! | Percentage | `0.00%` |
//! | Currency   | `Currency` |
//! | Scientific | `0.00E+00` |
//! | Time       | `hh:mm:ss` |
//! | Fraction   | `# ??/??` |
//! | Accounting | `_($* #,##0.00_)` |
//! | Boolean    | `Boolean` |
//! | Number     | `#,##0.00` |
//!
//! A cell with an explicit number format is judged by the format alone;
//! otherwise its literal value is pattern-matched.
use crate::spreadsheet::CellValue;
use chrono::NaiveDate;
use regex::Regex;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::OnceLock;

pub const DATE_TOKEN: &str = "yyyy-mm-dd";
pub const PERCENTAGE_TOKEN: &str = "0.00%";
pub const CURRENCY_TOKEN: &str = "Currency";
pub const SCIENTIFIC_TOKEN: &str = "0.00E+00";
pub const TIME_TOKEN: &str = "hh:mm:ss";
pub const FRACTION_TOKEN: &str = "# ??/??";
pub const ACCOUNTING_TOKEN: &str = "_($* #,##0.00_)";
pub const BOOLEAN_TOKEN: &str = "Boolean";
pub const NUMBER_TOKEN: &str = "#,##0.00";

/// Decides membership of a value/format pair in one canonical type.
pub trait TypeRecognizer: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Returns the type token when the pair belongs to this type.
    fn recognize(&self, value: &CellValue, format: Option<&str>) -> Option<String>;
}

/// Features of an Excel number format code, ignoring quoted literals,
/// escaped characters and bracketed sections such as colors.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FormatCode {
    pub has_date: bool,
    pub has_time: bool,
    pub has_percent: bool,
    pub has_currency: bool,
    pub has_exponent: bool,
    pub has_fraction: bool,
    pub has_fill: bool,
    pub has_padding: bool,
    pub has_digits: bool,
}

impl FormatCode {
    pub fn parse(format: &str) -> Self {
        let mut code = FormatCode::default();
        let mut is_escaped = false;
        let mut is_literal = false;
        let mut is_bracket = false;
        let mut bracket = String::new();
        let mut previous = ' ';
        for character in format.chars() {
            match character {
                _ if is_escaped => is_escaped = false,
                '\\' if !is_literal => is_escaped = true,
                '_' if !is_literal => {
                    code.has_padding = true;
                    is_escaped = true;
                }
                '*' if !is_literal && !is_bracket => {
                    code.has_fill = true;
                    is_escaped = true;
                }

                '"' if is_literal => is_literal = false,
                '"' if !is_bracket => is_literal = true,

                ']' if is_bracket => {
                    // [$€-407] locale currency, [$-409] bare locale, [h]/[mm]/[ss] elapsed time
                    if let Some(locale) = bracket.strip_prefix('$') {
                        if locale.split('-').next().is_some_and(|symbol| !symbol.is_empty()) {
                            code.has_currency = true;
                        }
                    }
                    let lower = bracket.to_ascii_lowercase();
                    if !lower.is_empty() && lower.chars().all(|char| matches!(char, 'h' | 'm' | 's')) {
                        code.has_time = true;
                    }
                    bracket.clear();
                    is_bracket = false;
                }
                '[' if !is_literal => is_bracket = true,
                _ if is_bracket => bracket.push(character),
                _ if is_literal => (),

                'Y' | 'y' | 'D' | 'd' => code.has_date = true,
                'H' | 'h' | 'S' | 's' => code.has_time = true,
                '%' => code.has_percent = true,
                '$' | '€' | '£' | '¥' => code.has_currency = true,
                'E' | 'e' if previous == '0' || previous == '#' || previous == '.' => code.has_exponent = true,
                '/' if matches!(previous, '?' | '#' | '0') => code.has_fraction = true,
                '0' | '#' | '?' => code.has_digits = true,
                _ => (),
            }
            previous = character;
        }
        code
    }

    /// Padding plus fill (`_(` and `*`) marks the accounting layout.
    pub fn is_accounting(&self) -> bool {
        self.has_padding && self.has_fill && self.has_digits
    }
}

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("Hardcode regex pattern"))
}

fn text(value: &CellValue) -> Option<&str> {
    value.as_text().map(str::trim)
}

#[derive(Debug)]
pub struct DateRecognizer;

impl TypeRecognizer for DateRecognizer {
    fn name(&self) -> &str {
        "date"
    }

    fn recognize(&self, value: &CellValue, format: Option<&str>) -> Option<String> {
        static ISO: OnceLock<Regex> = OnceLock::new();
        let matched = match format {
            Some(format) => FormatCode::parse(format).has_date,
            None => match value {
                CellValue::Date(_) => true,
                _ => text(value).is_some_and(|text| {
                    pattern(&ISO, r"^\d{4}-\d{2}-\d{2}$").is_match(text)
                        && NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
                        || ["%m/%d/%Y", "%d.%m.%Y", "%Y/%m/%d"]
                            .iter()
                            .any(|layout| NaiveDate::parse_from_str(text, layout).is_ok())
                }),
            },
        };
        matched.then(|| DATE_TOKEN.to_owned())
    }
}

#[derive(Debug)]
pub struct PercentageRecognizer;

impl TypeRecognizer for PercentageRecognizer {
    fn name(&self) -> &str {
        "percentage"
    }

    fn recognize(&self, value: &CellValue, format: Option<&str>) -> Option<String> {
        static PERCENT: OnceLock<Regex> = OnceLock::new();
        let matched = match format {
            Some(format) => FormatCode::parse(format).has_percent,
            None => text(value).is_some_and(|text| pattern(&PERCENT, r"^[-+]?\d+(\.\d+)?\s?%$").is_match(text)),
        };
        matched.then(|| PERCENTAGE_TOKEN.to_owned())
    }
}

#[derive(Debug)]
pub struct CurrencyRecognizer;

impl TypeRecognizer for CurrencyRecognizer {
    fn name(&self) -> &str {
        "currency"
    }

    fn recognize(&self, value: &CellValue, format: Option<&str>) -> Option<String> {
        static MONEY: OnceLock<Regex> = OnceLock::new();
        let matched = match format {
            Some(format) => {
                let code = FormatCode::parse(format);
                code.has_currency && !code.is_accounting()
            }
            None => text(value).is_some_and(|text| {
                pattern(&MONEY, r"^-?[$€£¥]\s?-?(\d{1,3}(,\d{3})+|\d+)(\.\d+)?$").is_match(text)
            }),
        };
        matched.then(|| CURRENCY_TOKEN.to_owned())
    }
}

#[derive(Debug)]
pub struct ScientificRecognizer;

impl TypeRecognizer for ScientificRecognizer {
    fn name(&self) -> &str {
        "scientific"
    }

    fn recognize(&self, value: &CellValue, format: Option<&str>) -> Option<String> {
        static EXPONENT: OnceLock<Regex> = OnceLock::new();
        let matched = match format {
            Some(format) => FormatCode::parse(format).has_exponent,
            None => text(value).is_some_and(|text| pattern(&EXPONENT, r"^[-+]?\d+(\.\d+)?[eE][-+]?\d+$").is_match(text)),
        };
        matched.then(|| SCIENTIFIC_TOKEN.to_owned())
    }
}

#[derive(Debug)]
pub struct TimeRecognizer;

impl TypeRecognizer for TimeRecognizer {
    fn name(&self) -> &str {
        "time"
    }

    fn recognize(&self, value: &CellValue, format: Option<&str>) -> Option<String> {
        static CLOCK: OnceLock<Regex> = OnceLock::new();
        let matched = match format {
            Some(format) => {
                let code = FormatCode::parse(format);
                code.has_time && !code.has_date
            }
            None => text(value).is_some_and(|text| {
                pattern(&CLOCK, r"^([01]?\d|2[0-3]):[0-5]\d(:[0-5]\d(\.\d+)?)?(\s?[AaPp][Mm])?$").is_match(text)
            }),
        };
        matched.then(|| TIME_TOKEN.to_owned())
    }
}

#[derive(Debug)]
pub struct FractionRecognizer;

impl TypeRecognizer for FractionRecognizer {
    fn name(&self) -> &str {
        "fraction"
    }

    fn recognize(&self, value: &CellValue, format: Option<&str>) -> Option<String> {
        static FRACTION: OnceLock<Regex> = OnceLock::new();
        let matched = match format {
            Some(format) => FormatCode::parse(format).has_fraction,
            None => text(value).is_some_and(|text| pattern(&FRACTION, r"^-?(\d+\s)?\d+/[1-9]\d*$").is_match(text)),
        };
        matched.then(|| FRACTION_TOKEN.to_owned())
    }
}

#[derive(Debug)]
pub struct AccountingRecognizer;

impl TypeRecognizer for AccountingRecognizer {
    fn name(&self) -> &str {
        "accounting"
    }

    fn recognize(&self, _: &CellValue, format: Option<&str>) -> Option<String> {
        format
            .filter(|format| FormatCode::parse(format).is_accounting())
            .map(|_| ACCOUNTING_TOKEN.to_owned())
    }
}

/// Affirmative/negative literals: English, German, French, Spanish.
const BOOLEAN_WORDS: [&str; 11] = ["true", "false", "yes", "no", "ja", "nein", "oui", "non", "sí", "si", "wahr"];

#[derive(Debug)]
pub struct BooleanRecognizer;

impl TypeRecognizer for BooleanRecognizer {
    fn name(&self) -> &str {
        "boolean"
    }

    fn recognize(&self, value: &CellValue, format: Option<&str>) -> Option<String> {
        let matched = match (value, format) {
            (CellValue::Boolean(_), _) => true,
            (_, Some(_)) => false,
            _ => text(value).is_some_and(|text| {
                let lower = text.to_lowercase();
                BOOLEAN_WORDS.contains(&lower.as_str()) || lower == "falsch"
            }),
        };
        matched.then(|| BOOLEAN_TOKEN.to_owned())
    }
}

#[derive(Debug)]
pub struct NumberRecognizer;

impl TypeRecognizer for NumberRecognizer {
    fn name(&self) -> &str {
        "number"
    }

    fn recognize(&self, value: &CellValue, format: Option<&str>) -> Option<String> {
        static NUMERIC: OnceLock<Regex> = OnceLock::new();
        let matched = match format {
            Some(format) => {
                let code = FormatCode::parse(format);
                code.has_digits && !code.has_date && !code.has_time
            }
            None => match value {
                CellValue::Number(_) => true,
                _ => text(value).is_some_and(|text| {
                    pattern(&NUMERIC, r"^[-+]?((\d{1,3}(,\d{3})+)|\d+)?(\.\d+)?$").is_match(text)
                        && text.chars().any(|char| char.is_ascii_digit())
                }),
            },
        };
        matched.then(|| NUMBER_TOKEN.to_owned())
    }
}

/// Ordered list of recognizers; the first match wins.
#[derive(Clone, Debug)]
pub struct RecognizerRegistry {
    recognizers: Vec<Arc<dyn TypeRecognizer>>,
}

impl Default for RecognizerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RecognizerRegistry {
    pub fn empty() -> Self {
        Self { recognizers: Vec::new() }
    }

    /// Built-in recognizers, most specific first.
    pub fn builtin() -> Self {
        Self {
            recognizers: vec![
                Arc::new(DateRecognizer),
                Arc::new(PercentageRecognizer),
                Arc::new(CurrencyRecognizer),
                Arc::new(ScientificRecognizer),
                Arc::new(TimeRecognizer),
                Arc::new(FractionRecognizer),
                Arc::new(AccountingRecognizer),
                Arc::new(BooleanRecognizer),
                Arc::new(NumberRecognizer),
            ],
        }
    }

    /// Appends a recognizer, tried after the existing ones.
    pub fn with(mut self, recognizer: impl TypeRecognizer + 'static) -> Self {
        self.recognizers.push(Arc::new(recognizer));
        self
    }

    /// Inserts a recognizer ahead of all others.
    pub fn with_first(mut self, recognizer: impl TypeRecognizer + 'static) -> Self {
        self.recognizers.insert(0, Arc::new(recognizer));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.recognizers.iter().map(|recognizer| recognizer.name()).collect()
    }

    /// Token of the first recognizer accepting the pair.
    pub fn recognize(&self, value: &CellValue, format: Option<&str>) -> Option<String> {
        self.recognizers
            .iter()
            .find_map(|recognizer| recognizer.recognize(value, format))
    }
}
