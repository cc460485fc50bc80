//! One pure function per field, from row text to a typed value.
//!
//! Fields with a fallback return [`Field`], so callers and tests can tell a
//! value read from the page apart from a default.

use std::sync::LazyLock;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use regex::Regex;

use super::breeds;
use crate::utils::{squash_whitespace, truncate};

pub const NAME_MATCH_MAX: usize = 20;

pub const DEFAULT_BREED: &str = "Mixed Breed";
pub const DEFAULT_AGE: &str = "Unknown";
pub const DEFAULT_SHELTER: &str = "LA County Shelter";
pub const DEFAULT_DEADLINE_DAYS: u64 = 3;

static ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[A-Z]\d{7}\b").unwrap());
static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)Shelter:|Age:|Scheduled\s*Euthanasia\s*Date:|only available to a rescue:|at the shelter since|on this list since",
    )
    .unwrap()
});
static STATUS_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)neutered|spayed").unwrap());

static BREED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\b(?:male|female)\b[\s,]*(.+?)\s*Shelter:").unwrap());
static STATUS_SEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:neutered|spayed)\s+(male|female)\b").unwrap());
static BARE_SEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(male|female)\b").unwrap());
static AGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)Age:[ \t]*([^\n\r]*)").unwrap());
static SHELTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Shelter:[ \t]*([^\n\r]*)").unwrap());
static DEADLINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:Scheduled\s*)?Euthanasia\s*Date:\s*(\d{1,2})/(\d{1,2})/(\d{4}|\d{2})\b")
        .unwrap()
});
static RESCUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)only available to a rescue:\s*(yes|no)").unwrap());
static INTAKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)at the shelter since[\s:]*").unwrap());
static LISTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)on this list since[\s:]*").unwrap());
static NUMERIC_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4}|\d{2})\b").unwrap());
static LONG_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]{3,9})\.?\s+(\d{1,2}),?\s+(\d{4})\b").unwrap());

/// A field value and whether it came from the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field<T> {
    Found(T),
    Default(T),
}

impl<T> Field<T> {
    pub fn value(&self) -> &T {
        match self {
            Field::Found(v) | Field::Default(v) => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Field::Found(v) | Field::Default(v) => v,
        }
    }

    fn or_default_if(self, reject: impl FnOnce(&T) -> bool, fallback: T) -> Field<T> {
        match self {
            Field::Found(v) if reject(&v) => Field::Default(fallback),
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Unknown => "Unknown",
        }
    }

    fn from_token(token: &str) -> Self {
        if token.eq_ignore_ascii_case("female") {
            Gender::Female
        } else {
            Gender::Male
        }
    }
}

/// The upstream animal id, e.g. `A1234567`.
///
/// Only the text before the first field label is searched, so an id-shaped
/// token inside a description or a later field never counts.
pub fn external_id(text: &str) -> Option<String> {
    let head = match LABEL_RE.find(text) {
        Some(m) => &text[..m.start()],
        None => text,
    };
    ID_RE.find(head).map(|m| m.as_str().to_string())
}

/// Bold name from the row markup. Status text ("NEUTERED MALE") sometimes
/// lands in the same markup, so overlong or status-bearing matches fall back
/// to the id.
pub fn name(emphasized: Option<&str>, external_id: &str) -> Field<String> {
    let field = match emphasized.map(squash_whitespace).filter(|n| !n.is_empty()) {
        Some(n) => Field::Found(n),
        None => Field::Default(external_id.to_string()),
    };
    field.or_default_if(
        |n| n.chars().count() > NAME_MATCH_MAX || STATUS_WORD_RE.is_match(n),
        external_id.to_string(),
    )
}

/// Breed text between the sex token and the `Shelter:` label, abbreviated.
pub fn breed(text: &str) -> Field<String> {
    BREED_RE
        .captures(text)
        .map(|c| breeds::abbreviate(&c[1]))
        .map(|b| b.trim_matches(|c: char| c == ',' || c == '.' || c.is_whitespace()).to_string())
        .filter(|b| !b.is_empty())
        .map(Field::Found)
        .unwrap_or_else(|| Field::Default(DEFAULT_BREED.to_string()))
}

pub fn gender(text: &str) -> Field<Gender> {
    if let Some(c) = STATUS_SEX_RE.captures(text) {
        return Field::Found(Gender::from_token(&c[1]));
    }

    // No status phrase anywhere, so the first bare token stands alone.
    BARE_SEX_RE
        .captures(text)
        .map(|c| Field::Found(Gender::from_token(&c[1])))
        .unwrap_or(Field::Default(Gender::Unknown))
}

pub fn age(text: &str) -> Field<String> {
    AGE_RE
        .captures(text)
        .map(|c| up_to_next_label(&c[1]))
        .filter(|a| !a.is_empty())
        .map(Field::Found)
        .unwrap_or_else(|| Field::Default(DEFAULT_AGE.to_string()))
}

/// Text between `Shelter:` and the first period, next label or line end.
pub fn shelter(text: &str) -> Field<String> {
    SHELTER_RE
        .captures(text)
        .map(|c| {
            let rest = &c[1];
            up_to_next_label(rest.split('.').next().unwrap_or(rest))
        })
        .filter(|s| !s.is_empty())
        .map(Field::Found)
        .unwrap_or_else(|| Field::Default(DEFAULT_SHELTER.to_string()))
}

fn up_to_next_label(rest: &str) -> String {
    let cut = LABEL_RE.find(rest).map_or(rest.len(), |m| m.start());
    squash_whitespace(&rest[..cut])
}

/// Scheduled euthanasia date, or `today` + 3 days when the page has none.
pub fn deadline(text: &str, today: NaiveDate) -> Field<NaiveDate> {
    DEADLINE_RE
        .captures(text)
        .and_then(|c| numeric_date(&c[1], &c[2], &c[3]))
        .map(Field::Found)
        .unwrap_or_else(|| {
            Field::Default(today + Days::new(DEFAULT_DEADLINE_DAYS))
        })
}

/// Whole days from `now` until midnight UTC of `deadline`, rounded up.
pub fn days_until(deadline: NaiveDate, now: DateTime<Utc>) -> i64 {
    let due = deadline.and_time(NaiveTime::MIN).and_utc();
    let secs = (due - now).num_seconds();
    (secs + 86_399).div_euclid(86_400)
}

/// `Yes`/`No` after the rescue-only label. Absent means `false`.
pub fn rescue_only(text: &str) -> Field<bool> {
    RESCUE_RE
        .captures(text)
        .map(|c| Field::Found(c[1].eq_ignore_ascii_case("yes")))
        .unwrap_or(Field::Default(false))
}

pub fn intake_date(text: &str) -> Option<NaiveDate> {
    date_after(&INTAKE_RE, text)
}

pub fn list_date(text: &str) -> Option<NaiveDate> {
    date_after(&LISTED_RE, text)
}

fn date_after(label: &Regex, text: &str) -> Option<NaiveDate> {
    let rest = &text[label.find(text)?.end()..];
    if let Some(c) = NUMERIC_DATE_RE.captures(rest) {
        return numeric_date(&c[1], &c[2], &c[3]);
    }
    let c = LONG_DATE_RE.captures(rest)?;
    NaiveDate::parse_from_str(&format!("{} {} {}", &c[1], &c[2], &c[3]), "%b %d %Y").ok()
}

/// `M/D/YY` or `M/D/YYYY`; two-digit years are 20xx.
fn numeric_date(month: &str, day: &str, year: &str) -> Option<NaiveDate> {
    let year = if year.len() == 2 {
        format!("20{}", year)
    } else {
        year.to_string()
    };
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

pub fn description(name: &str, shelter: &str, deadline: NaiveDate, max: usize) -> String {
    truncate(
        &format!(
            "{} is on the euthanasia list at {}. Urgent rescue needed by {}.",
            name,
            shelter,
            deadline.format("%Y-%m-%d")
        ),
        max,
    )
}
