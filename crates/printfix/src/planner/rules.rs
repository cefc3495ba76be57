//! Deterministic issue → action tables.
//!
//! Three tables: source-format tools for editable documents, PDF tools for
//! everything else, and PDF fallbacks for editable documents whose source
//! fix already failed. Same input, same plan.

use std::collections::{BTreeSet, HashMap};

use coordination::{Aggressiveness, PageSize};

use crate::diagnosis::{Diagnosis, IssueSeverity, IssueType};
use crate::fixes::{FixAction, FixPlan};
use crate::format::DocumentFormat;

/// Tools that change page geometry. They run before content-level tools.
pub const STRUCTURAL_TOOLS: &[&str] = &[
    "set_margins",
    "set_page_size",
    "set_orientation",
    "remove_blank_pages",
    "fix_page_breaks",
    "remove_manual_breaks",
    "pdf_crop_margins",
    "pdf_scale_content",
    "pdf_rotate_pages",
];

/// Inputs of one rule-based planning pass.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub job_id: &'a str,
    pub iteration: u32,
    pub diagnosis: &'a Diagnosis,
    pub format: Option<DocumentFormat>,
    pub target_page_size: Option<PageSize>,
    pub failed_issue_types: &'a BTreeSet<IssueType>,
}

/// Which severities a plan addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverityFilter {
    CriticalOnly,
    CriticalAndWarning,
    All,
}

impl SeverityFilter {
    /// Filter for `aggressiveness` under the rule strategy. `smart_auto`
    /// only reaches the rules when model planning is unavailable, and then
    /// stays conservative.
    pub fn for_rules(aggressiveness: Aggressiveness) -> Self {
        match aggressiveness {
            Aggressiveness::Conservative | Aggressiveness::SmartAuto => Self::CriticalOnly,
            Aggressiveness::Moderate => Self::CriticalAndWarning,
            Aggressiveness::Aggressive => Self::All,
        }
    }

    pub fn admits(self, severity: IssueSeverity) -> bool {
        match self {
            Self::CriticalOnly => severity == IssueSeverity::Critical,
            Self::CriticalAndWarning => severity != IssueSeverity::Info,
            Self::All => true,
        }
    }
}

// ── Tables ────────────────────────────────────────────────────────────

fn margins(inches: f64) -> FixAction {
    FixAction::new("set_margins")
        .param("top", inches)
        .param("bottom", inches)
        .param("left", inches)
        .param("right", inches)
}

fn pdf_crop(inches: f64) -> FixAction {
    FixAction::new("pdf_crop_margins")
        .param("top", inches)
        .param("bottom", inches)
        .param("left", inches)
        .param("right", inches)
}

fn pdf_scale(factor: f64) -> FixAction {
    FixAction::new("pdf_scale_content").param("scale_factor", factor)
}

fn pdf_rotate() -> FixAction {
    FixAction::new("pdf_rotate_pages")
        .param("pages", serde_json::Value::Null)
        .param("angle", 90)
}

/// Source-format (DOCX and friends) actions for an issue type.
pub fn source_actions(issue: IssueType) -> Option<Vec<FixAction>> {
    use IssueType::*;
    let actions = match issue {
        MarginViolation => vec![margins(0.75)
            .because("Set safe 0.75\" margins to prevent content clipping")],
        InconsistentMargins => vec![margins(0.75)
            .because("Normalize all sections to consistent 0.75\" margins")],
        ClippedContent => vec![
            margins(0.5).because("Widen the printable area so clipped content fits"),
            FixAction::new("auto_fit_tables").because("Fit tables that extend past the page edge"),
        ],
        TextOverflow => vec![FixAction::new("auto_fit_tables")
            .because("Fit overflowing tables to the text width")],
        TableOverflow => vec![
            FixAction::new("auto_fit_tables").because("Fit tables to the page width"),
            FixAction::new("resize_table_text")
                .param("table_index", 0)
                .param("max_font_size_pt", 9.0)
                .because("Shrink table text so columns fit"),
        ],
        SmallFont => vec![FixAction::new("adjust_font_size")
            .param("min_size_pt", 10.0)
            .because("Raise text below 10pt to a printable size")],
        WrongOrientation => vec![FixAction::new("set_orientation")
            .param("orientation", "landscape")
            .because("Switch to landscape for wide content")],
        BlankPage => vec![FixAction::new("remove_blank_pages")
            .because("Remove pages with no content")],
        BadPageBreak => vec![FixAction::new("fix_page_breaks")
            .param("strategy", "remove_consecutive")
            .because("Remove consecutive manual page breaks")],
        PageSizeMismatch => vec![FixAction::new("set_page_size")
            .param("width", 8.27)
            .param("height", 11.69)
            .because("Set the page size to the print target")],
        NonEmbeddedFont => vec![FixAction::new("replace_font")
            .param("from_font", "")
            .param("to_font", "Arial")
            .because("Replace a non-embedded font with a universally available one")],
        _ => return None,
    };
    Some(tag(actions, issue))
}

/// PDF-level actions for an issue type in a non-editable document.
pub fn pdf_actions(issue: IssueType) -> Option<Vec<FixAction>> {
    use IssueType::*;
    let action = match issue {
        MarginViolation | InconsistentMargins => {
            pdf_crop(0.25).because("Add margin space around page content")
        }
        ClippedContent => pdf_scale(0.9).because("Scale content down to pull it inside the page"),
        TextOverflow => pdf_scale(0.92).because("Scale content slightly to contain overflowing text"),
        TableOverflow => pdf_scale(0.85).because("Scale content to fit wide tables"),
        WrongOrientation => pdf_rotate().because("Rotate pages to match content orientation"),
        _ => return None,
    };
    Some(tag(vec![action], issue))
}

/// PDF-level replacements for source fixes that did not resolve an issue.
pub fn fallback_actions(issue: IssueType) -> Option<Vec<FixAction>> {
    pdf_actions(issue).map(|actions| {
        actions
            .into_iter()
            .map(|a| {
                let rationale = format!("Fallback: {}", a.rationale);
                a.because(rationale).fallback()
            })
            .collect()
    })
}

fn tag(actions: Vec<FixAction>, issue: IssueType) -> Vec<FixAction> {
    actions.into_iter().map(|a| a.targeting(issue)).collect()
}

// ── Planning ──────────────────────────────────────────────────────────

/// Build a plan from the tables.
pub fn plan(input: &RuleInput<'_>, filter: SeverityFilter) -> FixPlan {
    let editable = input.format.is_some_and(DocumentFormat::is_editable);
    let primary: fn(IssueType) -> Option<Vec<FixAction>> =
        if editable { source_actions } else { pdf_actions };

    // dedup key -> index into `actions`
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut actions: Vec<FixAction> = Vec::new();
    let mut skipped_issues = Vec::new();

    for issue in input.diagnosis.issues() {
        let issue_type = issue.issue_type;
        if !filter.admits(issue.severity) {
            skipped_issues.push(format!(
                "{issue_type} (severity {} below threshold)",
                issue.severity
            ));
            continue;
        }

        let templates = if editable && input.failed_issue_types.contains(&issue_type) {
            fallback_actions(issue_type).or_else(|| primary(lookup_key(issue, primary)))
        } else {
            primary(lookup_key(issue, primary)).or_else(|| {
                if editable {
                    fallback_actions(issue_type)
                } else {
                    None
                }
            })
        };

        let Some(templates) = templates else {
            skipped_issues.push(format!("{issue_type} (no fix available)"));
            continue;
        };

        for template in templates {
            let mut action =
                customize(template, issue.location.as_deref(), input.target_page_size);
            // A suggested_fix lookup tags the template with the suggested type;
            // the issue's own type must still be a target so failures route.
            if !action.target_issues.contains(&issue_type) {
                action.target_issues.push(issue_type);
            }

            let key = action.dedup_key();
            match seen.get(&key) {
                Some(&index) => {
                    let kept = &mut actions[index];
                    for target in action.target_issues {
                        if !kept.target_issues.contains(&target) {
                            kept.target_issues.push(target);
                        }
                    }
                }
                None => {
                    seen.insert(key, actions.len());
                    actions.push(action);
                }
            }
        }
    }

    sort_actions(&mut actions);

    FixPlan {
        job_id: input.job_id.to_string(),
        iteration: input.iteration,
        actions,
        skipped_issues,
    }
}

/// `suggested_fix` wins when it names an issue type the table maps.
fn lookup_key(
    issue: &crate::diagnosis::DiagnosisIssue,
    table: fn(IssueType) -> Option<Vec<FixAction>>,
) -> IssueType {
    issue
        .suggested_fix
        .as_deref()
        .and_then(|s| s.parse::<IssueType>().ok())
        .filter(|t| table(*t).is_some())
        .unwrap_or(issue.issue_type)
}

fn customize(
    mut action: FixAction,
    location: Option<&str>,
    target_page_size: Option<PageSize>,
) -> FixAction {
    match action.tool_name.as_str() {
        "set_page_size" => {
            if let Some((width, height)) = target_page_size.and_then(PageSize::dimensions_in) {
                action = action.param("width", width).param("height", height);
            }
        }
        "replace_font" => {
            if let Some(font) = location.filter(|l| !l.is_empty()) {
                action = action.param("from_font", font);
            }
        }
        _ => {}
    }
    action
}

/// Structural tier first, then primary before fallback, then tool name.
/// Stable, so equal keys keep plan order.
pub fn sort_actions(actions: &mut [FixAction]) {
    actions.sort_by_key(|a| {
        (
            !STRUCTURAL_TOOLS.contains(&a.tool_name.as_str()),
            a.is_fallback,
            a.tool_name.clone(),
        )
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::{DiagnosisIssue, IssueSource, PageDiagnosis};

    fn diagnosis(issues: Vec<DiagnosisIssue>) -> Diagnosis {
        Diagnosis::new(
            "j1",
            "standard",
            ".docx",
            1,
            vec![PageDiagnosis { page: 1, issues }],
            vec![],
        )
    }

    fn input<'a>(
        diagnosis: &'a Diagnosis,
        format: DocumentFormat,
        failed: &'a BTreeSet<IssueType>,
    ) -> RuleInput<'a> {
        RuleInput {
            job_id: "j1",
            iteration: 1,
            diagnosis,
            format: Some(format),
            target_page_size: None,
            failed_issue_types: failed,
        }
    }

    fn issue(t: IssueType, s: IssueSeverity) -> DiagnosisIssue {
        DiagnosisIssue::new(t, s, IssueSource::Visual, "x")
    }

    #[test]
    fn margins_get_four_equal_sides() {
        let diag = diagnosis(vec![issue(IssueType::MarginViolation, IssueSeverity::Critical)]);
        let failed = BTreeSet::new();
        let plan = plan(
            &input(&diag, DocumentFormat::Docx, &failed),
            SeverityFilter::CriticalOnly,
        );
        assert_eq!(plan.actions.len(), 1);
        let action = &plan.actions[0];
        assert_eq!(action.tool_name, "set_margins");
        for side in ["top", "bottom", "left", "right"] {
            assert_eq!(action.params[side], 0.75);
        }
        assert!(!action.is_fallback);
    }

    #[test]
    fn severity_filter_notes_skips() {
        let diag = diagnosis(vec![
            issue(IssueType::SmallFont, IssueSeverity::Warning),
            issue(IssueType::OrphanWidow, IssueSeverity::Critical),
        ]);
        let failed = BTreeSet::new();
        let plan = plan(
            &input(&diag, DocumentFormat::Docx, &failed),
            SeverityFilter::CriticalOnly,
        );
        assert!(plan.actions.is_empty());
        assert_eq!(
            plan.skipped_issues,
            vec![
                "small_font (severity warning below threshold)",
                "orphan_widow (no fix available)",
            ]
        );
    }

    #[test]
    fn pdf_documents_use_pdf_table() {
        let diag = diagnosis(vec![
            issue(IssueType::ClippedContent, IssueSeverity::Critical),
            issue(IssueType::SmallFont, IssueSeverity::Critical),
        ]);
        let failed = BTreeSet::new();
        let plan = plan(
            &input(&diag, DocumentFormat::Pdf, &failed),
            SeverityFilter::All,
        );
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].tool_name, "pdf_scale_content");
        assert_eq!(plan.actions[0].params["scale_factor"], 0.9);
        assert!(!plan.actions[0].is_fallback);
        assert_eq!(plan.skipped_issues, vec!["small_font (no fix available)"]);
    }

    #[test]
    fn suggested_fix_overrides_lookup_only_when_mapped() {
        let diag = diagnosis(vec![
            issue(IssueType::ClippedContent, IssueSeverity::Critical).suggesting("table_overflow"),
            issue(IssueType::BlankPage, IssueSeverity::Critical).suggesting("sharpen it"),
        ]);
        let failed = BTreeSet::new();
        let plan = plan(
            &input(&diag, DocumentFormat::Docx, &failed),
            SeverityFilter::CriticalOnly,
        );
        let tools: Vec<_> = plan.actions.iter().map(|a| a.tool_name.as_str()).collect();
        assert_eq!(tools, vec!["remove_blank_pages", "auto_fit_tables", "resize_table_text"]);
    }

    #[test]
    fn target_page_size_and_font_location_customize_params() {
        let diag = diagnosis(vec![
            issue(IssueType::PageSizeMismatch, IssueSeverity::Critical),
            issue(IssueType::NonEmbeddedFont, IssueSeverity::Critical).at("Calibri"),
        ]);
        let failed = BTreeSet::new();
        let mut input = input(&diag, DocumentFormat::Docx, &failed);
        input.target_page_size = Some(PageSize::Letter);
        let plan = plan(&input, SeverityFilter::CriticalOnly);

        let size = plan.actions.iter().find(|a| a.tool_name == "set_page_size").unwrap();
        assert_eq!(size.params["width"], 8.5);
        assert_eq!(size.params["height"], 11.0);
        let font = plan.actions.iter().find(|a| a.tool_name == "replace_font").unwrap();
        assert_eq!(font.params["from_font"], "Calibri");
        assert_eq!(font.params["to_font"], "Arial");
    }

    #[test]
    fn identical_actions_are_deduplicated() {
        let diag = diagnosis(vec![
            issue(IssueType::TextOverflow, IssueSeverity::Critical),
            issue(IssueType::TableOverflow, IssueSeverity::Critical),
            issue(IssueType::TextOverflow, IssueSeverity::Critical),
        ]);
        let failed = BTreeSet::new();
        let plan = plan(
            &input(&diag, DocumentFormat::Docx, &failed),
            SeverityFilter::CriticalOnly,
        );
        let tools: Vec<_> = plan.actions.iter().map(|a| a.tool_name.as_str()).collect();
        assert_eq!(tools, vec!["auto_fit_tables", "resize_table_text"]);
        assert_eq!(
            plan.actions[0].target_issues,
            vec![IssueType::TextOverflow, IssueType::TableOverflow]
        );
    }

    #[test]
    fn merged_duplicate_keeps_every_issue_type_as_target() {
        let diag = diagnosis(vec![
            issue(IssueType::MarginViolation, IssueSeverity::Critical),
            issue(IssueType::InconsistentMargins, IssueSeverity::Critical),
        ]);
        let failed = BTreeSet::new();
        let plan = plan(
            &input(&diag, DocumentFormat::Docx, &failed),
            SeverityFilter::CriticalOnly,
        );
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].tool_name, "set_margins");
        assert_eq!(
            plan.actions[0].target_issues,
            vec![IssueType::MarginViolation, IssueType::InconsistentMargins]
        );
    }

    #[test]
    fn suggested_fix_still_targets_the_reported_type() {
        let diag = diagnosis(vec![
            issue(IssueType::ClippedContent, IssueSeverity::Critical).suggesting("table_overflow"),
        ]);
        let failed = BTreeSet::new();
        let plan = plan(
            &input(&diag, DocumentFormat::Docx, &failed),
            SeverityFilter::CriticalOnly,
        );
        for action in &plan.actions {
            assert!(action.target_issues.contains(&IssueType::ClippedContent));
            assert!(action.target_issues.contains(&IssueType::TableOverflow));
        }
    }

    #[test]
    fn failed_types_route_to_fallback_table() {
        let diag = diagnosis(vec![
            issue(IssueType::MarginViolation, IssueSeverity::Critical),
            issue(IssueType::BlankPage, IssueSeverity::Critical),
        ]);
        let failed = BTreeSet::from([IssueType::MarginViolation, IssueType::BlankPage]);
        let plan = plan(
            &input(&diag, DocumentFormat::Docx, &failed),
            SeverityFilter::CriticalOnly,
        );
        let tools: Vec<_> = plan
            .actions
            .iter()
            .map(|a| (a.tool_name.as_str(), a.is_fallback))
            .collect();
        // blank_page has no fallback mapping, so it keeps its source fix.
        assert_eq!(tools, vec![("remove_blank_pages", false), ("pdf_crop_margins", true)]);
        assert!(plan.has_fallback_actions());
    }

    #[test]
    fn smart_auto_rules_stay_critical_only() {
        assert_eq!(
            SeverityFilter::for_rules(Aggressiveness::SmartAuto),
            SeverityFilter::CriticalOnly
        );
        assert!(SeverityFilter::for_rules(Aggressiveness::Aggressive).admits(IssueSeverity::Info));
        assert!(!SeverityFilter::for_rules(Aggressiveness::Moderate).admits(IssueSeverity::Info));
    }
}
