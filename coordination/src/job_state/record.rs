//! Typed view of a job record and the policy enums it carries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::JobStateError;
use super::status::JobStatus;
use crate::state::schema::fields;
use crate::state::FieldMap;

/// Effort preset: bundles model choice, iteration budget and planning strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffortLevel {
    Quick,
    #[default]
    Standard,
    Thorough,
}

impl EffortLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Standard => "standard",
            Self::Thorough => "thorough",
        }
    }
}

impl fmt::Display for EffortLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffortLevel {
    type Err = JobStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quick" => Ok(Self::Quick),
            "standard" => Ok(Self::Standard),
            "thorough" => Ok(Self::Thorough),
            other => Err(JobStateError::invalid_field(fields::EFFORT, other)),
        }
    }
}

/// Which issue severities the fix loop may touch automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggressiveness {
    /// Critical issues only.
    Conservative,
    /// Critical and warning issues.
    Moderate,
    /// Every issue, including info.
    Aggressive,
    /// Delegate the choice to the planning model.
    #[default]
    SmartAuto,
}

impl Aggressiveness {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Moderate => "moderate",
            Self::Aggressive => "aggressive",
            Self::SmartAuto => "smart_auto",
        }
    }
}

impl fmt::Display for Aggressiveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggressiveness {
    type Err = JobStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conservative" => Ok(Self::Conservative),
            "moderate" => Ok(Self::Moderate),
            "aggressive" => Ok(Self::Aggressive),
            "smart_auto" => Ok(Self::SmartAuto),
            other => Err(JobStateError::invalid_field(fields::AGGRESSIVENESS, other)),
        }
    }
}

/// Requested output page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSize {
    A4,
    Letter,
    Original,
}

impl PageSize {
    /// Width and height in inches, `None` for `Original`.
    pub fn dimensions_in(self) -> Option<(f64, f64)> {
        match self {
            Self::A4 => Some((8.27, 11.69)),
            Self::Letter => Some((8.5, 11.0)),
            Self::Original => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A4 => "a4",
            Self::Letter => "letter",
            Self::Original => "original",
        }
    }
}

impl FromStr for PageSize {
    type Err = JobStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "a4" => Ok(Self::A4),
            "letter" => Ok(Self::Letter),
            "original" => Ok(Self::Original),
            other => Err(JobStateError::invalid_field(fields::TARGET_PAGE_SIZE, other)),
        }
    }
}

/// A job record as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub original_filename: String,
    pub effort: EffortLevel,
    pub aggressiveness: Aggressiveness,
    /// Extension of the uploaded file, with leading dot (e.g. `.docx`).
    pub file_type: Option<String>,
    pub file_size_bytes: Option<u64>,
    pub pages: Option<u32>,
    /// Editable source document, when the upload was an editable format.
    pub source_path: Option<String>,
    /// Reference PDF rendering.
    pub pdf_path: Option<String>,
    pub target_page_size: Option<PageSize>,
    pub issues_found: u32,
    pub issues_fixed: u32,
    pub issues_skipped: u32,
    pub print_readiness: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Fields not covered above, kept verbatim.
    #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
    pub extra: FieldMap,
}

impl JobRecord {
    /// Decode a stored field map.
    pub fn from_fields(mut map: FieldMap) -> Result<Self, JobStateError> {
        let id = take_required(&mut map, fields::ID)?;
        let status = take_required(&mut map, fields::STATUS)?
            .parse::<JobStatus>()
            .map_err(|e| JobStateError::invalid_field(fields::STATUS, &e.0))?;
        let original_filename = map.remove(fields::ORIGINAL_FILENAME).unwrap_or_default();

        let effort = take_parsed(&mut map, fields::EFFORT)?.unwrap_or_default();
        let aggressiveness = take_parsed(&mut map, fields::AGGRESSIVENESS)?.unwrap_or_default();
        let target_page_size = take_parsed(&mut map, fields::TARGET_PAGE_SIZE)?;

        let file_type = take_non_empty(&mut map, fields::FILE_TYPE);
        let file_size_bytes = take_number(&mut map, fields::FILE_SIZE_BYTES)?;
        let pages = take_number(&mut map, fields::PAGES)?;
        let source_path = take_non_empty(&mut map, fields::SOURCE_PATH);
        let pdf_path = take_non_empty(&mut map, fields::PDF_PATH);
        let issues_found = take_number(&mut map, fields::ISSUES_FOUND)?.unwrap_or(0);
        let issues_fixed = take_number(&mut map, fields::ISSUES_FIXED)?.unwrap_or(0);
        let issues_skipped = take_number(&mut map, fields::ISSUES_SKIPPED)?.unwrap_or(0);
        let print_readiness = take_non_empty(&mut map, fields::PRINT_READINESS);

        let created_at = take_timestamp(&mut map, fields::CREATED_AT)?
            .ok_or_else(|| JobStateError::MissingField(fields::CREATED_AT.to_string()))?;
        let updated_at = take_timestamp(&mut map, fields::UPDATED_AT)?.unwrap_or(created_at);
        let completed_at = take_timestamp(&mut map, fields::COMPLETED_AT)?;
        let error = take_non_empty(&mut map, fields::ERROR);

        Ok(Self {
            id,
            status,
            original_filename,
            effort,
            aggressiveness,
            file_type,
            file_size_bytes,
            pages,
            source_path,
            pdf_path,
            target_page_size,
            issues_found,
            issues_fixed,
            issues_skipped,
            print_readiness,
            created_at,
            updated_at,
            completed_at,
            error,
            extra: map,
        })
    }
}

fn take_required(map: &mut FieldMap, field: &str) -> Result<String, JobStateError> {
    map.remove(field)
        .ok_or_else(|| JobStateError::MissingField(field.to_string()))
}

fn take_non_empty(map: &mut FieldMap, field: &str) -> Option<String> {
    map.remove(field).filter(|v| !v.is_empty())
}

fn take_parsed<T>(map: &mut FieldMap, field: &str) -> Result<Option<T>, JobStateError>
where
    T: FromStr<Err = JobStateError>,
{
    take_non_empty(map, field).map(|v| v.parse()).transpose()
}

fn take_number<T: FromStr>(map: &mut FieldMap, field: &str) -> Result<Option<T>, JobStateError> {
    take_non_empty(map, field)
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| JobStateError::invalid_field(field, &v))
        })
        .transpose()
}

fn take_timestamp(
    map: &mut FieldMap,
    field: &str,
) -> Result<Option<DateTime<Utc>>, JobStateError> {
    take_non_empty(map, field)
        .map(|v| {
            DateTime::parse_from_rfc3339(&v)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|_| JobStateError::invalid_field(field, &v))
        })
        .transpose()
}
