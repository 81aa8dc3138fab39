//! PHI sanitizer: deterministic redaction of sensitive entities in free text.
//!
//! Redaction runs as ordered, case-insensitive passes:
//!
//! | Pass | Matches | Placeholder |
//! |------|---------|-------------|
//! | 1 | numeric runs of 3+ digits, optionally comma-grouped | `[NUMBER]` |
//! | 2 | weekdays, `yesterday`/`today`, `last`/`this`/`next` + unit | `[TIMEFRAME]` |
//! | 3 | known app and brand names | `[APP]` |
//! | 4 | device models | `[DEVICE]` |
//! | 5 | bare brand names left after device models | `[APP]` |
//!
//! Decimal digits from other scripts (fullwidth, Arabic-Indic, Devanagari
//! and so on) are folded to ASCII before the passes run, so `１２,３４５` is
//! redacted like `12,345`.
//!
//! Placeholders contain no digits and none of the matched vocabulary, so a
//! later pass (or a second sanitization) never re-matches them. A final
//! verification pass looks for residual signatures: bare long numbers and
//! explicit calendar dates, plus any run of three or more other numeric
//! characters (circled or superscript digits). Under [`SanitizerPolicy::Strict`] a residual
//! blocks transmission; under [`SanitizerPolicy::Permissive`] it is redacted
//! best-effort and reported through `had_phi`.

use regex_lite::Regex;
use std::borrow::Cow;
use std::ops::Range;
use serde::{Deserialize, Serialize};
use stridechat_config::{SanitizerConfig, SanitizerPolicy};
use stridechat_core::error::SanitizationError;
use tracing::{debug, warn};

const NUMBER_PATTERN: &str = r"\d{1,3}(?:,\d{3})+|\d{3,}";

const TIMEFRAME_PATTERN: &str = r"(?i)\b(?:(?:last|this|next|past)\s+(?:weekend|week|month|year|night|morning|afternoon|evening|(?:mon|tues|wednes|thurs|fri|satur|sun)day)|(?:a|one|\d{1,2})\s+(?:days?|weeks?|months?)\s+ago|(?:mon|tues|wednes|thurs|fri|satur|sun)days?|yesterday|today|tonight|tomorrow)\b";

const APP_PATTERN: &str = r"(?i)\b(?:google\s+fit|apple\s+health|samsung\s+health|health\s+connect|garmin\s+connect|polar\s+flow|nike\s+run\s+club|zepp\s+life|mi\s+fit|fitbit|strava|myfitnesspal|withings|runkeeper|pacer|stepz|zepp)\b";

const DEVICE_PATTERN: &str = r"(?i)\b(?:iphone(?:\s*\d{1,2})?(?:\s+(?:pro\s+max|pro|plus|mini))?|pixel\s+watch(?:\s*\d)?|pixel\s*\d{1,2}a?(?:\s+pro)?|galaxy\s+watch(?:\s*\d{1,2})?|galaxy\s+(?:[sazn]\d{1,2}|fold\s*\d?|flip\s*\d?)(?:\s+(?:ultra|plus))?|apple\s+watch(?:\s+(?:series\s+\d{1,2}|ultra(?:\s*\d)?|se))?|(?:charge|versa|sense|inspire|luxe)\s+\d|forerunner(?:\s+\d{1,2})?|vivoactive(?:\s+\d)?|venu(?:\s+\d)?|fenix(?:\s+\d)?|oneplus(?:\s+\d{1,2})?|mi\s+band(?:\s+\d)?|oura\s+ring)\b";

// Runs after devices so "Apple Watch" and "Galaxy S23" match whole first.
const BRAND_PATTERN: &str = r"(?i)\b(?:samsung|garmin|google|apple|xiaomi|huawei|amazfit|motorola|suunto|coros|whoop|oura)\b";

const MONTH_DAY_PATTERN: &str = r"(?i)\b(?:(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+\d{1,2}(?:st|nd|rd|th)?|\d{1,2}(?:st|nd|rd|th)?\s+(?:of\s+)?(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?))\b";

const NUMERIC_DATE_PATTERN: &str = r"\b(?:0?[1-9]|1[0-2])/(?:0?[1-9]|[12]\d|3[01])(?:/\d{2,4})?\b";

const RESIDUAL_NUMBER_PATTERN: &str = r"\d{3,}";

/// Code point of `0` in each Unicode decimal digit block folded to ASCII.
const DIGIT_ZEROS: &[u32] = &[
    0x0660, 0x06F0, 0x07C0, 0x0966, 0x09E6, 0x0A66, 0x0AE6, 0x0B66, 0x0BE6, 0x0C66, 0x0CE6, 0x0D66,
    0x0DE6, 0x0E50, 0x0ED0, 0x0F20, 0x1040, 0x1090, 0x17E0, 0x1810, 0x1946, 0x19D0, 0x1A80, 0x1A90,
    0x1B50, 0x1BB0, 0x1C40, 0x1C50, 0xA620, 0xA8D0, 0xA900, 0xA9D0, 0xA9F0, 0xAA50, 0xABF0, 0xFF10,
];

/// Mathematical bold, double-struck, sans-serif and monospace digits.
const MATH_DIGITS: Range<u32> = 0x1D7CE..0x1D800;

const MIN_NUMERIC_RUN: usize = 3;

/// Kind of sensitive entity a placeholder stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhiCategory {
    Number,
    Timeframe,
    App,
    Device,
}

impl PhiCategory {
    /// The token inserted in place of a match.
    pub fn placeholder(&self) -> &'static str {
        match self {
            PhiCategory::Number => "[NUMBER]",
            PhiCategory::Timeframe => "[TIMEFRAME]",
            PhiCategory::App => "[APP]",
            PhiCategory::Device => "[DEVICE]",
        }
    }
}

impl std::fmt::Display for PhiCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PhiCategory::Number => "NUMBER",
            PhiCategory::Timeframe => "TIMEFRAME",
            PhiCategory::App => "APP",
            PhiCategory::Device => "DEVICE",
        };
        f.write_str(name)
    }
}

/// How many matches of one category were replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub category: PhiCategory,
    pub count: usize,
}

/// Output of a sanitization run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizationResult {
    pub sanitized_text: String,
    pub had_phi: bool,
    /// Per-category counts in pass order.
    pub replacements: Vec<Replacement>,
}

impl SanitizationResult {
    /// Replacements made for one category.
    pub fn count(&self, category: PhiCategory) -> usize {
        self.replacements
            .iter()
            .filter(|r| r.category == category)
            .map(|r| r.count)
            .sum()
    }

    pub fn total_replacements(&self) -> usize {
        self.replacements.iter().map(|r| r.count).sum()
    }
}

/// Errors building a sanitizer.
#[derive(Debug, thiserror::Error)]
pub enum SanitizerError {
    #[error("invalid redaction pattern for {category}: {reason}")]
    InvalidPattern { category: PhiCategory, reason: String },
}

struct RedactionPass {
    category: PhiCategory,
    pattern: Regex,
}

impl RedactionPass {
    fn new(category: PhiCategory, pattern: &str) -> Result<Self, SanitizerError> {
        let pattern = Regex::new(pattern).map_err(|e| SanitizerError::InvalidPattern {
            category,
            reason: e.to_string(),
        })?;
        Ok(Self { category, pattern })
    }

    /// Replace every match; returns the number of replacements.
    fn apply(&self, text: &mut String) -> usize {
        let count = self.pattern.find_iter(text).count();
        if count > 0 {
            *text = self
                .pattern
                .replace_all(text, self.category.placeholder())
                .into_owned();
        }
        count
    }
}

/// Detects and redacts sensitive entities in free text.
pub struct PhiSanitizer {
    policy: SanitizerPolicy,
    passes: Vec<RedactionPass>,
    residual_checks: Vec<RedactionPass>,
}

impl std::fmt::Debug for PhiSanitizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhiSanitizer")
            .field("policy", &self.policy)
            .field("passes", &self.passes.len())
            .field("residual_checks", &self.residual_checks.len())
            .finish()
    }
}

impl PhiSanitizer {
    /// Build a sanitizer from configuration.
    pub fn new(config: &SanitizerConfig) -> Result<Self, SanitizerError> {
        let mut passes = vec![
            RedactionPass::new(PhiCategory::Number, NUMBER_PATTERN)?,
            RedactionPass::new(PhiCategory::Timeframe, TIMEFRAME_PATTERN)?,
            RedactionPass::new(PhiCategory::App, APP_PATTERN)?,
        ];

        let extra: Vec<String> = config
            .extra_app_names
            .iter()
            .filter_map(|name| name_pattern(name))
            .collect();
        if !extra.is_empty() {
            let pattern = format!("(?i)(?:{})", extra.join("|"));
            passes.push(RedactionPass::new(PhiCategory::App, &pattern)?);
        }

        passes.push(RedactionPass::new(PhiCategory::Device, DEVICE_PATTERN)?);
        passes.push(RedactionPass::new(PhiCategory::App, BRAND_PATTERN)?);

        // Dates before bare numbers so "March 5" is reported as one timeframe.
        let residual_checks = vec![
            RedactionPass::new(PhiCategory::Timeframe, MONTH_DAY_PATTERN)?,
            RedactionPass::new(PhiCategory::Timeframe, NUMERIC_DATE_PATTERN)?,
            RedactionPass::new(PhiCategory::Number, RESIDUAL_NUMBER_PATTERN)?,
        ];

        Ok(Self {
            policy: config.policy,
            passes,
            residual_checks,
        })
    }

    /// A sanitizer with default vocabulary and the given policy.
    pub fn with_policy(policy: SanitizerPolicy) -> Result<Self, SanitizerError> {
        Self::new(&SanitizerConfig {
            policy,
            extra_app_names: Vec::new(),
        })
    }

    pub fn policy(&self) -> SanitizerPolicy {
        self.policy
    }

    /// Sanitize `text` under the configured policy.
    ///
    /// Strict mode fails with [`SanitizationError::ResidualPhi`] when the
    /// verification pass finds anything; the error carries the input length
    /// only. Empty input always succeeds.
    pub fn sanitize(&self, text: &str) -> Result<SanitizationResult, SanitizationError> {
        match self.policy {
            SanitizerPolicy::Permissive => Ok(self.redact(text)),
            SanitizerPolicy::Strict => {
                let (sanitized_text, replacements) = self.run_passes(text);
                let residual = self.residual_signatures(&sanitized_text) + numeric_runs(&sanitized_text).len();
                if residual > 0 {
                    warn!(
                        text_len = text.len(),
                        residual,
                        "Residual PHI after redaction, blocking transmission"
                    );
                    return Err(SanitizationError::ResidualPhi {
                        text_len: text.len(),
                    });
                }
                Ok(SanitizationResult {
                    had_phi: !replacements.is_empty(),
                    sanitized_text,
                    replacements,
                })
            }
        }
    }

    /// Best-effort redaction that never fails, regardless of policy.
    ///
    /// Residual signatures are redacted too and flagged through `had_phi`.
    pub fn redact(&self, text: &str) -> SanitizationResult {
        let (mut sanitized_text, mut replacements) = self.run_passes(text);

        let mut residual = 0;
        for check in &self.residual_checks {
            let count = check.apply(&mut sanitized_text);
            if count > 0 {
                residual += count;
                record(&mut replacements, check.category, count);
            }
        }
        let runs = redact_numeric_runs(&mut sanitized_text);
        if runs > 0 {
            residual += runs;
            record(&mut replacements, PhiCategory::Number, runs);
        }
        if residual > 0 {
            debug!(text_len = text.len(), residual, "Residual PHI redacted best-effort");
        }

        SanitizationResult {
            had_phi: !replacements.is_empty(),
            sanitized_text,
            replacements,
        }
    }

    fn run_passes(&self, text: &str) -> (String, Vec<Replacement>) {
        let mut current = fold_digits(text).into_owned();
        let mut replacements = Vec::new();
        for pass in &self.passes {
            let count = pass.apply(&mut current);
            if count > 0 {
                record(&mut replacements, pass.category, count);
            }
        }
        (current, replacements)
    }

    fn residual_signatures(&self, text: &str) -> usize {
        self.residual_checks
            .iter()
            .map(|check| check.pattern.find_iter(text).count())
            .sum()
    }
}

/// Literal pattern for a configured name: whitespace-tolerant, with word
/// boundaries only where the name starts or ends with a word character.
fn name_pattern(name: &str) -> Option<String> {
    let words: Vec<String> = name.split_whitespace().map(regex_lite::escape).collect();
    if words.is_empty() {
        return None;
    }
    let trimmed = name.trim();
    let starts_word = trimmed.chars().next().is_some_and(|c| c.is_alphanumeric());
    let ends_word = trimmed.chars().last().is_some_and(|c| c.is_alphanumeric());
    Some(format!(
        "{}{}{}",
        if starts_word { r"\b" } else { "" },
        words.join(r"\s+"),
        if ends_word { r"\b" } else { "" },
    ))
}

/// ASCII equivalent of a non-ASCII decimal digit.
fn ascii_digit(c: char) -> Option<char> {
    if c.is_ascii() {
        return None;
    }
    let cp = c as u32;
    let value = DIGIT_ZEROS
        .iter()
        .find_map(|&zero| cp.checked_sub(zero).filter(|offset| *offset < 10))
        .or_else(|| MATH_DIGITS.contains(&cp).then(|| (cp - MATH_DIGITS.start) % 10))?;
    char::from_digit(value, 10)
}

fn fold_digits(text: &str) -> Cow<'_, str> {
    if text.is_ascii() || !text.chars().any(|c| ascii_digit(c).is_some()) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.chars().map(|c| ascii_digit(c).unwrap_or(c)).collect())
}

/// Byte ranges of numeric runs the regex passes cannot see: at least
/// [`MIN_NUMERIC_RUN`] numeric characters, one of them non-ASCII.
fn numeric_runs(text: &str) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = None;
    let mut len = 0;
    let mut non_ascii = false;
    let mut close = |start: Option<usize>, end: usize, len: usize, non_ascii: bool| {
        if let Some(start) = start {
            if len >= MIN_NUMERIC_RUN && non_ascii {
                runs.push(start..end);
            }
        }
    };
    for (idx, c) in text.char_indices() {
        if c.is_numeric() {
            start.get_or_insert(idx);
            len += 1;
            non_ascii |= !c.is_ascii();
        } else {
            close(start.take(), idx, len, non_ascii);
            len = 0;
            non_ascii = false;
        }
    }
    close(start, text.len(), len, non_ascii);
    runs
}

fn redact_numeric_runs(text: &mut String) -> usize {
    let runs = numeric_runs(text);
    for range in runs.iter().rev() {
        text.replace_range(range.clone(), PhiCategory::Number.placeholder());
    }
    runs.len()
}

fn record(replacements: &mut Vec<Replacement>, category: PhiCategory, count: usize) {
    match replacements.iter_mut().find(|r| r.category == category) {
        Some(existing) => existing.count += count,
        None => replacements.push(Replacement { category, count }),
    }
}
