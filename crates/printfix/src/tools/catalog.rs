//! Static tool catalog with typed, schema-described parameters.
//!
//! Every tool's parameter object is a struct deriving `JsonSchema` and
//! rejecting unknown fields. [`ToolCall`] ties a tool name to its parameter
//! struct, so parsing an open [`ToolParams`] map into a `ToolCall` *is* the
//! schema validation.
//!
//! ```text
//! Source tools: set_margins, set_page_size, set_orientation, remove_blank_pages,
//!               replace_font, adjust_font_size, auto_fit_tables,
//!               resize_table_text, fix_page_breaks, remove_manual_breaks
//! PDF tools:    pdf_crop_margins, pdf_scale_content, pdf_rotate_pages
//! ```

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{FixTool, ToolError, ToolLevel};
use crate::fixes::{FixResult, ToolParams};

// ── Parameter structs ─────────────────────────────────────────────────

/// Page margins in inches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MarginsParams {
    #[serde(default = "half_inch")]
    pub top: f64,
    #[serde(default = "half_inch")]
    pub bottom: f64,
    #[serde(default = "half_inch")]
    pub left: f64,
    #[serde(default = "half_inch")]
    pub right: f64,
}

/// Page dimensions in inches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PageSizeParams {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Portrait,
    Landscape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OrientationParams {
    pub orientation: Orientation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReplaceFontParams {
    /// Font to replace. Empty matches every non-embedded font.
    #[serde(default)]
    pub from_font: String,
    pub to_font: String,
}

/// Clamp run font sizes into `[min_size_pt, max_size_pt]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FontSizeParams {
    #[serde(default)]
    pub min_size_pt: Option<f64>,
    #[serde(default)]
    pub max_size_pt: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TableTextParams {
    #[serde(default)]
    pub table_index: u32,
    #[serde(default = "ten_points")]
    pub max_font_size_pt: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PageBreakStrategy {
    /// Drop a manual break that directly follows another.
    #[default]
    RemoveConsecutive,
    /// Drop every manual break.
    RemoveAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PageBreakParams {
    #[serde(default)]
    pub strategy: PageBreakStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScaleParams {
    /// Content scale in `(0, 1]`.
    pub scale_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RotateParams {
    /// 1-based page numbers; `None` rotates every page.
    #[serde(default)]
    pub pages: Option<Vec<u32>>,
    #[serde(default = "quarter_turn")]
    pub angle: i32,
}

/// Parameterless tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NoParams {}

fn half_inch() -> f64 {
    0.5
}

fn ten_points() -> f64 {
    10.0
}

fn quarter_turn() -> i32 {
    90
}

// ── Typed calls ───────────────────────────────────────────────────────

/// A tool name bound to its validated parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "params", rename_all = "snake_case")]
pub enum ToolCall {
    SetMargins(MarginsParams),
    SetPageSize(PageSizeParams),
    SetOrientation(OrientationParams),
    RemoveBlankPages(NoParams),
    ReplaceFont(ReplaceFontParams),
    AdjustFontSize(FontSizeParams),
    AutoFitTables(NoParams),
    ResizeTableText(TableTextParams),
    FixPageBreaks(PageBreakParams),
    RemoveManualBreaks(NoParams),
    PdfCropMargins(MarginsParams),
    PdfScaleContent(ScaleParams),
    PdfRotatePages(RotateParams),
}

impl ToolCall {
    /// Parse and range-check an open parameter map for `tool`.
    pub fn parse(tool: &str, params: &ToolParams) -> Result<Self, ToolError> {
        let invalid = |message: String| ToolError::InvalidParams {
            tool: tool.to_string(),
            message,
        };

        let envelope = serde_json::json!({ "tool": tool, "params": params });
        let call: ToolCall =
            serde_json::from_value(envelope).map_err(|e| invalid(e.to_string()))?;
        call.check_ranges().map_err(invalid)?;
        Ok(call)
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::SetMargins(_) => "set_margins",
            Self::SetPageSize(_) => "set_page_size",
            Self::SetOrientation(_) => "set_orientation",
            Self::RemoveBlankPages(_) => "remove_blank_pages",
            Self::ReplaceFont(_) => "replace_font",
            Self::AdjustFontSize(_) => "adjust_font_size",
            Self::AutoFitTables(_) => "auto_fit_tables",
            Self::ResizeTableText(_) => "resize_table_text",
            Self::FixPageBreaks(_) => "fix_page_breaks",
            Self::RemoveManualBreaks(_) => "remove_manual_breaks",
            Self::PdfCropMargins(_) => "pdf_crop_margins",
            Self::PdfScaleContent(_) => "pdf_scale_content",
            Self::PdfRotatePages(_) => "pdf_rotate_pages",
        }
    }

    fn check_ranges(&self) -> Result<(), String> {
        match self {
            Self::SetMargins(m) | Self::PdfCropMargins(m) => {
                for (side, value) in [
                    ("top", m.top),
                    ("bottom", m.bottom),
                    ("left", m.left),
                    ("right", m.right),
                ] {
                    if !(0.0..=4.0).contains(&value) {
                        return Err(format!("{side} margin {value} outside 0..=4 inches"));
                    }
                }
                Ok(())
            }
            Self::SetPageSize(p) if p.width <= 0.0 || p.height <= 0.0 => {
                Err(format!("page size {}x{} must be positive", p.width, p.height))
            }
            Self::ReplaceFont(f) if f.to_font.trim().is_empty() => {
                Err("to_font must not be empty".into())
            }
            Self::AdjustFontSize(f) => match (f.min_size_pt, f.max_size_pt) {
                (None, None) => Err("one of min_size_pt or max_size_pt is required".into()),
                (Some(min), Some(max)) if min > max => {
                    Err(format!("min_size_pt {min} exceeds max_size_pt {max}"))
                }
                (Some(v), _) | (_, Some(v)) if v <= 0.0 => {
                    Err(format!("font size {v} must be positive"))
                }
                _ => Ok(()),
            },
            Self::ResizeTableText(t) if t.max_font_size_pt <= 0.0 => {
                Err(format!("max_font_size_pt {} must be positive", t.max_font_size_pt))
            }
            Self::PdfScaleContent(s) if !(s.scale_factor > 0.0 && s.scale_factor <= 1.0) => {
                Err(format!("scale_factor {} outside (0, 1]", s.scale_factor))
            }
            Self::PdfRotatePages(r) if r.angle % 90 != 0 => {
                Err(format!("angle {} is not a multiple of 90", r.angle))
            }
            _ => Ok(()),
        }
    }
}

// ── Catalog ───────────────────────────────────────────────────────────

/// Static description of one catalog tool.
pub struct ToolSpec {
    pub name: &'static str,
    pub level: ToolLevel,
    pub description: &'static str,
    schema: fn() -> schemars::schema::RootSchema,
}

impl ToolSpec {
    pub fn parameters_schema(&self) -> serde_json::Value {
        serde_json::to_value((self.schema)()).unwrap_or_default()
    }
}

macro_rules! spec {
    ($name:literal, $level:ident, $params:ty, $desc:literal) => {
        ToolSpec {
            name: $name,
            level: ToolLevel::$level,
            description: $desc,
            schema: || schemars::schema_for!($params),
        }
    };
}

pub static CATALOG: &[ToolSpec] = &[
    spec!("set_margins", Source, MarginsParams, "Set page margins on every section"),
    spec!("set_page_size", Source, PageSizeParams, "Set page width and height on every section"),
    spec!("set_orientation", Source, OrientationParams, "Switch section orientation"),
    spec!("remove_blank_pages", Source, NoParams, "Delete pages with no content"),
    spec!("replace_font", Source, ReplaceFontParams, "Replace a font family throughout"),
    spec!("adjust_font_size", Source, FontSizeParams, "Clamp run font sizes to a range"),
    spec!("auto_fit_tables", Source, NoParams, "Fit every table to the text width"),
    spec!("resize_table_text", Source, TableTextParams, "Cap the font size inside a table"),
    spec!("fix_page_breaks", Source, PageBreakParams, "Remove problematic manual page breaks"),
    spec!("remove_manual_breaks", Source, NoParams, "Remove every manual page break"),
    spec!("pdf_crop_margins", Pdf, MarginsParams, "Grow the PDF crop box to add margin space"),
    spec!("pdf_scale_content", Pdf, ScaleParams, "Scale PDF page content about the center"),
    spec!("pdf_rotate_pages", Pdf, RotateParams, "Rotate PDF pages"),
];

pub fn spec(name: &str) -> Option<&'static ToolSpec> {
    CATALOG.iter().find(|s| s.name == name)
}

/// Names of PDF-level catalog tools.
pub fn pdf_tool_names() -> impl Iterator<Item = &'static str> {
    CATALOG
        .iter()
        .filter(|s| s.level == ToolLevel::Pdf)
        .map(|s| s.name)
}

// ── Backend-bound tools ───────────────────────────────────────────────

/// The document-mutation service that actually edits files.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn apply(&self, path: &Path, job_id: &str, call: &ToolCall)
        -> Result<FixResult, ToolError>;
}

/// A catalog entry dispatching validated calls to a [`ToolBackend`].
pub struct BuiltinTool {
    spec: &'static ToolSpec,
    backend: Arc<dyn ToolBackend>,
}

impl BuiltinTool {
    pub fn new(spec: &'static ToolSpec, backend: Arc<dyn ToolBackend>) -> Self {
        Self { spec, backend }
    }
}

#[async_trait]
impl FixTool for BuiltinTool {
    fn name(&self) -> &'static str {
        self.spec.name
    }

    fn level(&self) -> ToolLevel {
        self.spec.level
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.spec.parameters_schema()
    }

    fn validate(&self, params: &ToolParams) -> Result<(), ToolError> {
        ToolCall::parse(self.spec.name, params).map(|_| ())
    }

    async fn apply(
        &self,
        path: &Path,
        job_id: &str,
        params: &ToolParams,
    ) -> Result<FixResult, ToolError> {
        let call = ToolCall::parse(self.spec.name, params)?;
        self.backend.apply(path, job_id, &call).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(value: serde_json::Value) -> ToolParams {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn catalog_names_match_calls() {
        let samples = [
            ("set_margins", json!({})),
            ("set_page_size", json!({"width": 8.5, "height": 11.0})),
            ("set_orientation", json!({"orientation": "landscape"})),
            ("remove_blank_pages", json!({})),
            ("replace_font", json!({"from_font": "Calibri", "to_font": "Arial"})),
            ("adjust_font_size", json!({"min_size_pt": 10.0})),
            ("auto_fit_tables", json!({})),
            ("resize_table_text", json!({"table_index": 0, "max_font_size_pt": 9.0})),
            ("fix_page_breaks", json!({"strategy": "remove_consecutive"})),
            ("remove_manual_breaks", json!({})),
            ("pdf_crop_margins", json!({"top": 0.25, "bottom": 0.25, "left": 0.25, "right": 0.25})),
            ("pdf_scale_content", json!({"scale_factor": 0.85})),
            ("pdf_rotate_pages", json!({"pages": null, "angle": 90})),
        ];
        assert_eq!(samples.len(), CATALOG.len());
        for (name, p) in samples {
            let call = ToolCall::parse(name, &params(p)).unwrap();
            assert_eq!(call.tool_name(), name);
            assert!(spec(name).is_some());
        }
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let call = ToolCall::parse("pdf_rotate_pages", &ToolParams::new()).unwrap();
        assert_eq!(
            call,
            ToolCall::PdfRotatePages(RotateParams {
                pages: None,
                angle: 90
            })
        );
    }

    #[test]
    fn rejects_unknown_and_out_of_range_params() {
        assert!(ToolCall::parse("set_margins", &params(json!({"gutter": 1.0}))).is_err());
        assert!(ToolCall::parse("set_margins", &params(json!({"top": -1.0}))).is_err());
        assert!(ToolCall::parse("pdf_scale_content", &params(json!({"scale_factor": 1.5}))).is_err());
        assert!(ToolCall::parse("pdf_rotate_pages", &params(json!({"angle": 45}))).is_err());
        assert!(ToolCall::parse("adjust_font_size", &ToolParams::new()).is_err());
        assert!(ToolCall::parse("replace_font", &params(json!({"to_font": " "}))).is_err());
        assert!(ToolCall::parse("set_orientation", &params(json!({"orientation": "diagonal"}))).is_err());
    }

    #[test]
    fn unknown_tool_fails_parse() {
        let err = ToolCall::parse("sharpen_images", &ToolParams::new()).unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams { .. }));
    }

    #[test]
    fn schemas_describe_fields() {
        let schema = spec("pdf_scale_content").unwrap().parameters_schema();
        assert!(schema["properties"]["scale_factor"].is_object());
        assert_eq!(pdf_tool_names().count(), 3);
    }
}
