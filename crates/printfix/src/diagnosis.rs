//! Diagnosis data model.
//!
//! A [`Diagnosis`] is an immutable snapshot of the issues found in a
//! document. Its [`DiagnosisSummary`] is always derived from the issues:
//! constructing or deserializing a diagnosis recomputes it, and a summary
//! carried in the input is ignored.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of issue descriptions kept in [`DiagnosisSummary::top_issues`].
pub const TOP_ISSUES: usize = 5;

const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Closed set of detectable issue kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    ClippedContent,
    MarginViolation,
    OrphanWidow,
    MisalignedElements,
    ImageOverflow,
    TextOverflow,
    SmallFont,
    WrongOrientation,
    BlankPage,
    VisualInconsistency,
    NonEmbeddedFont,
    RgbColorspace,
    LowDpiImage,
    PageSizeMismatch,
    InconsistentMargins,
    BadPageBreak,
    TableOverflow,
    HiddenContent,
    TrackedChanges,
}

impl IssueType {
    pub const ALL: [IssueType; 19] = [
        Self::ClippedContent,
        Self::MarginViolation,
        Self::OrphanWidow,
        Self::MisalignedElements,
        Self::ImageOverflow,
        Self::TextOverflow,
        Self::SmallFont,
        Self::WrongOrientation,
        Self::BlankPage,
        Self::VisualInconsistency,
        Self::NonEmbeddedFont,
        Self::RgbColorspace,
        Self::LowDpiImage,
        Self::PageSizeMismatch,
        Self::InconsistentMargins,
        Self::BadPageBreak,
        Self::TableOverflow,
        Self::HiddenContent,
        Self::TrackedChanges,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClippedContent => "clipped_content",
            Self::MarginViolation => "margin_violation",
            Self::OrphanWidow => "orphan_widow",
            Self::MisalignedElements => "misaligned_elements",
            Self::ImageOverflow => "image_overflow",
            Self::TextOverflow => "text_overflow",
            Self::SmallFont => "small_font",
            Self::WrongOrientation => "wrong_orientation",
            Self::BlankPage => "blank_page",
            Self::VisualInconsistency => "visual_inconsistency",
            Self::NonEmbeddedFont => "non_embedded_font",
            Self::RgbColorspace => "rgb_colorspace",
            Self::LowDpiImage => "low_dpi_image",
            Self::PageSizeMismatch => "page_size_mismatch",
            Self::InconsistentMargins => "inconsistent_margins",
            Self::BadPageBreak => "bad_page_break",
            Self::TableOverflow => "table_overflow",
            Self::HiddenContent => "hidden_content",
            Self::TrackedChanges => "tracked_changes",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown issue type `{0}`")]
pub struct UnknownIssueType(pub String);

impl FromStr for IssueType {
    type Err = UnknownIssueType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownIssueType(s.to_string()))
    }
}

/// Issue severity. Declaration order is the ranking order (critical first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSource {
    Visual,
    Structural,
    Merged,
}

/// One detected issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisIssue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    pub source: IssueSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Free-form location hint; for font issues this carries the font name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub description: String,
    /// Issue type whose remedy the diagnoser recommends instead of the
    /// issue's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

impl DiagnosisIssue {
    pub fn new(
        issue_type: IssueType,
        severity: IssueSeverity,
        source: IssueSource,
        description: impl Into<String>,
    ) -> Self {
        Self {
            issue_type,
            severity,
            source,
            page: None,
            location: None,
            description: description.into(),
            suggested_fix: None,
            confidence: DEFAULT_CONFIDENCE,
        }
    }

    pub fn on_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn suggesting(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    fn normalized(mut self) -> Self {
        self.confidence = if self.confidence.is_nan() {
            DEFAULT_CONFIDENCE
        } else {
            self.confidence.clamp(0.0, 1.0)
        };
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDiagnosis {
    pub page: u32,
    #[serde(default)]
    pub issues: Vec<DiagnosisIssue>,
}

/// Overall print-readiness verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintReadiness {
    MajorIssues,
    NeedsFixes,
    Ready,
}

impl PrintReadiness {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MajorIssues => "major_issues",
            Self::NeedsFixes => "needs_fixes",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for PrintReadiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisSummary {
    pub total_issues: u32,
    pub critical_count: u32,
    pub warning_count: u32,
    pub info_count: u32,
    pub top_issues: Vec<String>,
    pub print_readiness: PrintReadiness,
}

impl DiagnosisSummary {
    fn compute<'a>(issues: impl Iterator<Item = &'a DiagnosisIssue>) -> Self {
        let mut ranked: Vec<&DiagnosisIssue> = issues.collect();
        let count = |severity| ranked.iter().filter(|i| i.severity == severity).count() as u32;
        let critical_count = count(IssueSeverity::Critical);
        let warning_count = count(IssueSeverity::Warning);
        let info_count = count(IssueSeverity::Info);

        let print_readiness = if critical_count > 0 {
            PrintReadiness::MajorIssues
        } else if warning_count > 0 {
            PrintReadiness::NeedsFixes
        } else {
            PrintReadiness::Ready
        };

        ranked.sort_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
        });

        Self {
            total_issues: ranked.len() as u32,
            critical_count,
            warning_count,
            info_count,
            top_issues: ranked
                .iter()
                .take(TOP_ISSUES)
                .map(|i| i.description.clone())
                .collect(),
            print_readiness,
        }
    }

    /// Critical plus warning count.
    pub fn important_count(&self) -> u32 {
        self.critical_count + self.warning_count
    }
}

/// Immutable diagnosis of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DiagnosisWire")]
pub struct Diagnosis {
    job_id: String,
    effort_level: String,
    file_type: String,
    page_count: u32,
    pages: Vec<PageDiagnosis>,
    document_issues: Vec<DiagnosisIssue>,
    summary: DiagnosisSummary,
}

/// Input shape: everything but the summary.
#[derive(Deserialize)]
struct DiagnosisWire {
    job_id: String,
    #[serde(default)]
    effort_level: String,
    file_type: String,
    #[serde(default)]
    page_count: u32,
    #[serde(default)]
    pages: Vec<PageDiagnosis>,
    #[serde(default)]
    document_issues: Vec<DiagnosisIssue>,
}

impl From<DiagnosisWire> for Diagnosis {
    fn from(wire: DiagnosisWire) -> Self {
        Self::new(
            wire.job_id,
            wire.effort_level,
            wire.file_type,
            wire.page_count,
            wire.pages,
            wire.document_issues,
        )
    }
}

impl Diagnosis {
    pub fn new(
        job_id: impl Into<String>,
        effort_level: impl Into<String>,
        file_type: impl Into<String>,
        page_count: u32,
        pages: Vec<PageDiagnosis>,
        document_issues: Vec<DiagnosisIssue>,
    ) -> Self {
        let pages: Vec<PageDiagnosis> = pages
            .into_iter()
            .map(|p| PageDiagnosis {
                page: p.page,
                issues: p.issues.into_iter().map(DiagnosisIssue::normalized).collect(),
            })
            .collect();
        let document_issues: Vec<DiagnosisIssue> = document_issues
            .into_iter()
            .map(DiagnosisIssue::normalized)
            .collect();

        let summary = DiagnosisSummary::compute(
            pages
                .iter()
                .flat_map(|p| p.issues.iter())
                .chain(document_issues.iter()),
        );

        Self {
            job_id: job_id.into(),
            effort_level: effort_level.into(),
            file_type: file_type.into(),
            page_count,
            pages,
            document_issues,
            summary,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn effort_level(&self) -> &str {
        &self.effort_level
    }

    pub fn file_type(&self) -> &str {
        &self.file_type
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn pages(&self) -> &[PageDiagnosis] {
        &self.pages
    }

    pub fn document_issues(&self) -> &[DiagnosisIssue] {
        &self.document_issues
    }

    pub fn summary(&self) -> &DiagnosisSummary {
        &self.summary
    }

    /// All issues: per-page issues in page order, then document-level issues.
    pub fn issues(&self) -> impl Iterator<Item = &DiagnosisIssue> {
        self.pages
            .iter()
            .flat_map(|p| p.issues.iter())
            .chain(self.document_issues.iter())
    }
}
