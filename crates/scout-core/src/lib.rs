//! Core domain model, validation and filtering for Scout.

pub mod filter;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "scout-core";

/// Closed set of opportunity categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityKind {
    Scholarship,
    Internship,
    Summit,
    Competition,
}

impl OpportunityKind {
    pub const ALL: [OpportunityKind; 4] = [
        OpportunityKind::Scholarship,
        OpportunityKind::Internship,
        OpportunityKind::Summit,
        OpportunityKind::Competition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityKind::Scholarship => "scholarship",
            OpportunityKind::Internship => "internship",
            OpportunityKind::Summit => "summit",
            OpportunityKind::Competition => "competition",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OpportunityKind::Scholarship => "Scholarship",
            OpportunityKind::Internship => "Internship",
            OpportunityKind::Summit => "Summit",
            OpportunityKind::Competition => "Competition",
        }
    }

    /// Stock artwork used when a record carries no image of its own.
    pub fn default_image(&self) -> &'static str {
        match self {
            OpportunityKind::Scholarship => "/assets/scholarship.jpg",
            OpportunityKind::Internship => "/assets/internship.jpg",
            OpportunityKind::Summit => "/assets/summit.jpg",
            OpportunityKind::Competition => "/assets/competition.jpg",
        }
    }
}

impl fmt::Display for OpportunityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpportunityKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        OpportunityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ValidationError::UnknownCategory(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown opportunity category `{0}`")]
    UnknownCategory(String),
    #[error("deadline window `{0}` is not a non-negative day count")]
    DeadlineWindow(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("tag names must not be blank")]
    BlankTag,
}

/// Persisted opportunity columns, without the tag relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityRow {
    pub id: String,
    pub title: String,
    pub organization: String,
    #[serde(rename = "type")]
    pub kind: OpportunityKind,
    pub description: String,
    pub full_description: String,
    pub deadline: NaiveDate,
    pub location: String,
    pub amount: Option<String>,
    pub url: String,
    pub image_url: Option<String>,
}

impl OpportunityRow {
    pub fn with_tags(self, tags: Vec<String>) -> Opportunity {
        Opportunity {
            id: self.id,
            title: self.title,
            organization: self.organization,
            kind: self.kind,
            description: self.description,
            full_description: self.full_description,
            deadline: self.deadline,
            location: self.location,
            amount: self.amount,
            url: self.url,
            image_url: self.image_url,
            tags: dedup_tag_names(tags),
        }
    }
}

/// Catalog record as browsed, filtered and shown on the detail view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub title: String,
    pub organization: String,
    #[serde(rename = "type")]
    pub kind: OpportunityKind,
    /// Short blurb for list views.
    pub description: String,
    /// Long-form body for the detail view.
    pub full_description: String,
    pub deadline: NaiveDate,
    pub location: String,
    pub amount: Option<String>,
    pub url: String,
    pub image_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Opportunity {
    pub fn image(&self) -> &str {
        self.image_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.kind.default_image())
    }

    /// Long US-style deadline, e.g. `Sunday, September 15, 2024`.
    pub fn formatted_deadline(&self) -> String {
        self.deadline.format("%A, %B %-d, %Y").to_string()
    }
}

/// Create payload from the CMS form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityInput {
    pub title: String,
    pub organization: String,
    #[serde(rename = "type")]
    pub kind: OpportunityKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub full_description: String,
    pub deadline: NaiveDate,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub amount: Option<String>,
    pub url: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl OpportunityInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("title", &self.title)?;
        require("organization", &self.organization)?;
        require("url", &self.url)?;
        validate_tag_names(&self.tags)
    }

    /// Blank optional text collapses to `None`; duplicate tags collapse to one.
    pub fn normalized(mut self) -> Self {
        self.amount = blank_to_none(self.amount);
        self.image_url = blank_to_none(self.image_url);
        self.tags = dedup_tag_names(self.tags);
        self
    }

    pub fn into_row(self, id: impl Into<String>) -> OpportunityRow {
        OpportunityRow {
            id: id.into(),
            title: self.title,
            organization: self.organization,
            kind: self.kind,
            description: self.description,
            full_description: self.full_description,
            deadline: self.deadline,
            location: self.location,
            amount: self.amount,
            url: self.url,
            image_url: self.image_url,
        }
    }
}

/// Partial update. `tags: Some(..)` replaces the tag set; `None` leaves it alone.
/// An empty `amount` or `image_url` clears the stored value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpportunityPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<OpportunityKind>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub full_description: Option<String>,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl OpportunityPatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = &self.title {
            require("title", title)?;
        }
        if let Some(organization) = &self.organization {
            require("organization", organization)?;
        }
        if let Some(url) = &self.url {
            require("url", url)?;
        }
        if let Some(tags) = &self.tags {
            validate_tag_names(tags)?;
        }
        Ok(())
    }

    pub fn apply_to(&self, row: &mut OpportunityRow) {
        if let Some(v) = &self.title {
            row.title = v.clone();
        }
        if let Some(v) = &self.organization {
            row.organization = v.clone();
        }
        if let Some(v) = self.kind {
            row.kind = v;
        }
        if let Some(v) = &self.description {
            row.description = v.clone();
        }
        if let Some(v) = &self.full_description {
            row.full_description = v.clone();
        }
        if let Some(v) = self.deadline {
            row.deadline = v;
        }
        if let Some(v) = &self.location {
            row.location = v.clone();
        }
        if let Some(v) = &self.amount {
            row.amount = blank_to_none(Some(v.clone()));
        }
        if let Some(v) = &self.url {
            row.url = v.clone();
        }
        if let Some(v) = &self.image_url {
            row.image_url = blank_to_none(Some(v.clone()));
        }
    }

    pub fn touches_columns(&self) -> bool {
        self.title.is_some()
            || self.organization.is_some()
            || self.kind.is_some()
            || self.description.is_some()
            || self.full_description.is_some()
            || self.deadline.is_some()
            || self.location.is_some()
            || self.amount.is_some()
            || self.url.is_some()
            || self.image_url.is_some()
    }
}

/// Shared tag entity; `name` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

/// One row of the opportunity/tag join table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagLink {
    pub opportunity_id: String,
    pub tag_id: String,
}

/// Drops repeated names, keeping the first occurrence. Comparison is case-sensitive.
pub fn dedup_tag_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(Into::into)
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

fn validate_tag_names(tags: &[String]) -> Result<(), ValidationError> {
    if tags.iter().any(|t| t.trim().is_empty()) {
        return Err(ValidationError::BlankTag);
    }
    Ok(())
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(())
    }
}

/// Whitespace-only optional text is treated as absent.
pub fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> OpportunityInput {
        OpportunityInput {
            title: "Google STEP Internship".into(),
            organization: "Google".into(),
            kind: OpportunityKind::Internship,
            description: "Developmental internship".into(),
            full_description: "Twelve weeks alongside Google engineers.".into(),
            deadline: NaiveDate::from_ymd_opt(2024, 10, 30).unwrap(),
            location: "Mountain View, CA".into(),
            amount: Some("$8,000/month".into()),
            url: "https://careers.google.com/students/".into(),
            image_url: None,
            tags: vec!["tech".into(), "paid".into()],
        }
    }

    #[test]
    fn kind_parses_case_insensitively_and_rejects_unknown() {
        assert_eq!("Summit".parse::<OpportunityKind>(), Ok(OpportunityKind::Summit));
        assert_eq!(
            " competition ".parse::<OpportunityKind>(),
            Ok(OpportunityKind::Competition)
        );
        assert_eq!(
            "fellowship".parse::<OpportunityKind>(),
            Err(ValidationError::UnknownCategory("fellowship".into()))
        );
    }

    #[test]
    fn kind_serializes_under_type_key() {
        let row = input().into_row("1");
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["type"], "internship");
        assert_eq!(json["deadline"], "2024-10-30");
    }

    #[test]
    fn input_requires_core_fields() {
        let mut missing_title = input();
        missing_title.title = "  ".into();
        assert_eq!(
            missing_title.validate(),
            Err(ValidationError::MissingField("title"))
        );

        let mut missing_url = input();
        missing_url.url = String::new();
        assert_eq!(missing_url.validate(), Err(ValidationError::MissingField("url")));

        let mut blank_tag = input();
        blank_tag.tags.push(" ".into());
        assert_eq!(blank_tag.validate(), Err(ValidationError::BlankTag));

        assert!(input().validate().is_ok());
    }

    #[test]
    fn normalized_input_collapses_blanks_and_duplicate_tags() {
        let mut raw = input();
        raw.amount = Some(String::new());
        raw.image_url = Some("   ".into());
        raw.tags = vec!["tech".into(), "Tech".into(), "tech".into()];
        let normalized = raw.normalized();
        assert_eq!(normalized.amount, None);
        assert_eq!(normalized.image_url, None);
        assert_eq!(normalized.tags, vec!["tech".to_string(), "Tech".to_string()]);
    }

    #[test]
    fn patch_only_touches_supplied_columns() {
        let mut row = input().into_row("1");
        let patch = OpportunityPatch {
            title: Some("Google STEP".into()),
            amount: Some(String::new()),
            ..Default::default()
        };
        patch.apply_to(&mut row);
        assert_eq!(row.title, "Google STEP");
        assert_eq!(row.amount, None);
        assert_eq!(row.organization, "Google");
        assert!(patch.touches_columns());
        assert!(!OpportunityPatch::default().touches_columns());
    }

    #[test]
    fn image_falls_back_to_category_artwork() {
        let mut record = input().into_row("1").with_tags(vec![]);
        assert_eq!(record.image(), "/assets/internship.jpg");
        record.image_url = Some("https://cdn.example.org/step.png".into());
        assert_eq!(record.image(), "https://cdn.example.org/step.png");
    }

    #[test]
    fn deadline_formats_long_form() {
        let record = input().into_row("1").with_tags(vec![]);
        assert_eq!(record.formatted_deadline(), "Wednesday, October 30, 2024");
    }
}
