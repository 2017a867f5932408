// Report generation from page pass outcomes

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::scan::{PassOutcome, RecordedMark};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!("unknown report format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<String>,
    pub pages: Vec<PageReport>,
    pub summary: ReportSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageReport {
    pub url: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub marks: Vec<MarkReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plugin_errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReport {
    pub mark: String,
    pub name: String,
    pub plugin: String,
    pub count: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_pages: usize,
    pub delivered: usize,
    pub failed: usize,
    pub total_marks: u32,
    pub plugin_errors: usize,
}

impl From<&RecordedMark> for MarkReport {
    fn from(recorded: &RecordedMark) -> Self {
        Self {
            mark: recorded.mark.machine_name.clone(),
            name: recorded.mark.name.clone(),
            plugin: recorded.plugin.clone(),
            count: recorded.count,
            details: recorded.details.clone(),
        }
    }
}

pub fn gather_report_data(outcomes: &[PassOutcome]) -> ReportData {
    let mut summary = ReportSummary {
        total_pages: outcomes.len(),
        ..ReportSummary::default()
    };
    let mut scan_id = None;

    let pages = outcomes
        .iter()
        .map(|outcome| {
            summary.plugin_errors += outcome.plugin_errors().len();
            let plugin_errors = outcome.plugin_errors().iter().map(|e| e.to_string()).collect();

            match outcome {
                PassOutcome::Delivered(pass) => {
                    summary.delivered += 1;
                    summary.total_marks += pass.result.total_marks();
                    scan_id.get_or_insert_with(|| pass.result.scan_id.clone());

                    PageReport {
                        url: pass.result.page_url.clone(),
                        state: outcome.state().as_str().to_string(),
                        title: pass.result.title.clone(),
                        error: None,
                        marks: pass.result.marks.iter().map(MarkReport::from).collect(),
                        plugin_errors,
                        warnings: pass.warnings.clone(),
                    }
                }
                PassOutcome::Failed(pass) => {
                    summary.failed += 1;

                    PageReport {
                        url: pass.page_url.clone(),
                        state: outcome.state().as_str().to_string(),
                        title: None,
                        error: Some(pass.error.to_string()),
                        marks: Vec::new(),
                        plugin_errors,
                        warnings: Vec::new(),
                    }
                }
            }
        })
        .collect();

    ReportData {
        scan_id,
        pages,
        summary,
    }
}

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";
const THIN_RULE: &str = "────────────────────────────────────────────────────────────────────────────────\n";

pub fn generate_text_report(data: &ReportData) -> String {
    let mut report = String::new();

    // Header
    report.push_str(RULE);
    report.push_str("                          SITEMASTER SCAN REPORT\n");
    report.push_str(RULE);
    report.push('\n');

    if let Some(ref scan_id) = data.scan_id {
        report.push_str(&format!("Scan ID:      {}\n", scan_id));
    }
    report.push_str(&format!("Pages:        {}\n", data.summary.total_pages));
    report.push_str(&format!("Delivered:    {}\n", data.summary.delivered));
    report.push_str(&format!("Failed:       {}\n", data.summary.failed));
    report.push_str(&format!("Total Marks:  {}\n", data.summary.total_marks));
    if data.summary.plugin_errors > 0 {
        report.push_str(&format!("Plugin Errors: {}\n", data.summary.plugin_errors));
    }
    report.push('\n');

    if !data.pages.is_empty() {
        report.push_str(RULE);
        report.push_str("PAGES\n");
        report.push_str(RULE);
        report.push('\n');
    }

    for (idx, page) in data.pages.iter().enumerate() {
        report.push_str(&format!("[{}] {}\n", idx + 1, page.url));
        report.push_str(&format!("State:        {}\n", page.state.to_uppercase()));

        if let Some(ref title) = page.title {
            report.push_str(&format!("Title:        {}\n", title));
        }
        if let Some(ref error) = page.error {
            report.push_str(&format!("Error:        {}\n", error));
        }

        if page.marks.is_empty() {
            if page.error.is_none() {
                report.push_str("\n  No marks recorded.\n");
            }
        } else {
            report.push_str("\nMarks:\n");
            for mark in &page.marks {
                report.push_str(&format!("  [{}] {}  ({})\n", mark.mark, mark.count, mark.plugin));
                for detail in &mark.details {
                    report.push_str(&format!("      - {}\n", detail));
                }
            }
        }

        if !page.plugin_errors.is_empty() {
            report.push_str("\nPlugin Errors:\n");
            for error in &page.plugin_errors {
                report.push_str(&format!("  ! {}\n", error));
            }
        }

        if !page.warnings.is_empty() {
            report.push_str("\nWarnings:\n");
            for warning in &page.warnings {
                report.push_str(&format!("  ! {}\n", warning));
            }
        }

        report.push('\n');
        report.push_str(THIN_RULE);
        report.push('\n');
    }

    // Footer
    report.push_str(RULE);
    report.push_str("                              End of Report\n");
    report.push_str(RULE);

    report
}

pub fn generate_json_report(data: &ReportData) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "sitemaster",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "format": "json"
            },
            "scan_id": data.scan_id,
            "summary": data.summary,
            "pages": data.pages
        }
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn render_report(data: &ReportData, format: ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => Ok(generate_text_report(data)),
        ReportFormat::Json => generate_json_report(data),
    }
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}
