//! Multi-criterion browse filter over an in-memory opportunity list.
//!
//! Groups combine with AND; selections inside a group combine with OR. An empty
//! group places no constraint on the result.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Opportunity, OpportunityKind, ValidationError};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Location exactly equal to this is the only one excluded by `International`.
pub const HOME_COUNTRY: &str = "United States";

/// Location selections offered to browsers.
pub const LOCATION_OPTIONS: [&str; 5] = [
    "United States",
    "International",
    "Europe",
    "Global",
    "Remote",
];

/// Deadline windows offered to browsers, in days.
pub const DEADLINE_WINDOW_OPTIONS: [u32; 3] = [30, 60, 90];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationFilter {
    /// Everything except a location of exactly [`HOME_COUNTRY`].
    International,
    /// Only a location of exactly `Global`.
    Global,
    /// Case-insensitive substring of the record location.
    Contains(String),
}

impl LocationFilter {
    /// Blank input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" => None,
            "International" => Some(LocationFilter::International),
            "Global" => Some(LocationFilter::Global),
            other => Some(LocationFilter::Contains(other.to_string())),
        }
    }

    pub fn matches(&self, location: &str) -> bool {
        match self {
            LocationFilter::International => location != HOME_COUNTRY,
            LocationFilter::Global => location == "Global",
            LocationFilter::Contains(needle) => location
                .to_lowercase()
                .contains(&needle.to_lowercase()),
        }
    }
}

/// "Due within the next N days" window. Inclusive at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeadlineWindow(pub u32);

impl DeadlineWindow {
    pub fn days(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, diff_days: i64) -> bool {
        diff_days >= 0 && diff_days <= i64::from(self.0)
    }
}

impl FromStr for DeadlineWindow {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(DeadlineWindow)
            .map_err(|_| ValidationError::DeadlineWindow(s.to_string()))
    }
}

/// Filter selections in their raw string form, as received from a query string
/// or command-line flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFilterQuery {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub deadlines: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriteria {
    pub query: String,
    pub categories: BTreeSet<OpportunityKind>,
    pub locations: Vec<LocationFilter>,
    pub deadline_windows: Vec<DeadlineWindow>,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_category(mut self, kind: OpportunityKind) -> Self {
        self.categories.insert(kind);
        self
    }

    pub fn with_location(mut self, location: LocationFilter) -> Self {
        if !self.locations.contains(&location) {
            self.locations.push(location);
        }
        self
    }

    pub fn with_deadline_window(mut self, days: u32) -> Self {
        let window = DeadlineWindow(days);
        if !self.deadline_windows.contains(&window) {
            self.deadline_windows.push(window);
        }
        self
    }

    /// Builds criteria from raw selections. Values that do not parse are dropped
    /// and returned alongside; a group left with no valid value is unconstrained.
    pub fn parse_lenient(raw: &RawFilterQuery) -> (Self, Vec<ValidationError>) {
        let mut rejected = Vec::new();
        let mut criteria = FilterCriteria::new().with_query(raw.query.clone());

        for value in &raw.categories {
            match value.parse::<OpportunityKind>() {
                Ok(kind) => criteria = criteria.with_category(kind),
                Err(err) => rejected.push(err),
            }
        }
        for value in &raw.locations {
            if let Some(location) = LocationFilter::parse(value) {
                criteria = criteria.with_location(location);
            }
        }
        for value in &raw.deadlines {
            match value.parse::<DeadlineWindow>() {
                Ok(window) => criteria = criteria.with_deadline_window(window.days()),
                Err(err) => rejected.push(err),
            }
        }

        (criteria, rejected)
    }

    pub fn is_unconstrained(&self) -> bool {
        self.query.is_empty()
            && self.categories.is_empty()
            && self.locations.is_empty()
            && self.deadline_windows.is_empty()
    }

    pub fn matches(&self, record: &Opportunity, as_of: NaiveDate) -> bool {
        Prepared::new(self).matches(record, as_of)
    }
}

/// Criteria with the text needle lowered once per filter pass.
struct Prepared<'a> {
    criteria: &'a FilterCriteria,
    needle: String,
}

impl<'a> Prepared<'a> {
    fn new(criteria: &'a FilterCriteria) -> Self {
        Self {
            criteria,
            needle: criteria.query.to_lowercase(),
        }
    }

    fn matches(&self, record: &Opportunity, as_of: NaiveDate) -> bool {
        self.matches_text(record)
            && self.matches_category(record)
            && self.matches_location(record)
            && self.matches_deadline(record, as_of)
    }

    fn matches_text(&self, record: &Opportunity) -> bool {
        if self.criteria.query.is_empty() {
            return true;
        }
        let needle = self.needle.as_str();
        record.title.to_lowercase().contains(needle)
            || record.organization.to_lowercase().contains(needle)
            || record.description.to_lowercase().contains(needle)
            || record
                .tags
                .iter()
                .any(|tag| tag.to_lowercase().contains(needle))
    }

    fn matches_category(&self, record: &Opportunity) -> bool {
        self.criteria.categories.is_empty() || self.criteria.categories.contains(&record.kind)
    }

    fn matches_location(&self, record: &Opportunity) -> bool {
        self.criteria.locations.is_empty()
            || self
                .criteria
                .locations
                .iter()
                .any(|filter| filter.matches(&record.location))
    }

    fn matches_deadline(&self, record: &Opportunity, as_of: NaiveDate) -> bool {
        if self.criteria.deadline_windows.is_empty() {
            return true;
        }
        let diff_days = days_until(record.deadline, as_of);
        self.criteria
            .deadline_windows
            .iter()
            .any(|window| window.contains(diff_days))
    }
}

/// Returns the records satisfying every active criterion, in input order.
pub fn filter(
    records: &[Opportunity],
    criteria: &FilterCriteria,
    as_of: NaiveDate,
) -> Vec<Opportunity> {
    let prepared = Prepared::new(criteria);
    records
        .iter()
        .filter(|record| prepared.matches(record, as_of))
        .cloned()
        .collect()
}

/// [`filter`] against the calendar day of `now` (UTC).
pub fn filter_at(
    records: &[Opportunity],
    criteria: &FilterCriteria,
    now: DateTime<Utc>,
) -> Vec<Opportunity> {
    filter(records, criteria, now.date_naive())
}

/// Whole calendar days from `as_of` to `deadline`; negative once it has passed.
pub fn days_until(deadline: NaiveDate, as_of: NaiveDate) -> i64 {
    (deadline - as_of).num_days()
}

/// Days from `now` to UTC midnight of `deadline`, rounded up. Any time of day on
/// the deadline's own date yields 0.
pub fn days_until_at(deadline: NaiveDate, now: DateTime<Utc>) -> i64 {
    let due = deadline.and_time(NaiveTime::MIN).and_utc();
    let millis = (due - now).num_milliseconds();
    -((-millis).div_euclid(MILLIS_PER_DAY))
}
