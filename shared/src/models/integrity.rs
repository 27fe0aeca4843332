//! Integrity audit models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the six independent audit dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    Financial,
    Inventory,
    Delivery,
    Reference,
    BusinessRule,
    DataQuality,
}

impl CheckCategory {
    pub const ALL: [CheckCategory; 6] = [
        CheckCategory::Financial,
        CheckCategory::Inventory,
        CheckCategory::Delivery,
        CheckCategory::Reference,
        CheckCategory::BusinessRule,
        CheckCategory::DataQuality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckCategory::Financial => "financial",
            CheckCategory::Inventory => "inventory",
            CheckCategory::Delivery => "delivery",
            CheckCategory::Reference => "reference",
            CheckCategory::BusinessRule => "business_rule",
            CheckCategory::DataQuality => "data_quality",
        }
    }
}

impl std::fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finding severity, ordered critical > warning > info > success
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Info,
    Success,
}

impl Severity {
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 3,
            Severity::Warning => 2,
            Severity::Info => 1,
            Severity::Success => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Success => "success",
        }
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// A single audit finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityCheckResult {
    pub category: CheckCategory,
    /// Stable rule name, e.g. `order_item_total_mismatch`
    pub check: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub affected_records: u64,
    #[serde(default)]
    pub sample_records: Vec<serde_json::Value>,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
    /// Query or derivation the finding came from
    pub derivation: String,
    /// Mid-flight pipeline state rather than corruption
    #[serde(default)]
    pub in_progress: bool,
}

impl IntegrityCheckResult {
    pub fn success(
        category: CheckCategory,
        check: impl Into<String>,
        title: impl Into<String>,
        derivation: impl Into<String>,
    ) -> Self {
        Self {
            category,
            check: check.into(),
            severity: Severity::Success,
            title: title.into(),
            description: "No discrepancies found".to_string(),
            affected_records: 0,
            sample_records: Vec::new(),
            suggested_actions: Vec::new(),
            derivation: derivation.into(),
            in_progress: false,
        }
    }

    pub fn finding(
        category: CheckCategory,
        check: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
        affected_records: u64,
    ) -> Self {
        Self {
            category,
            check: check.into(),
            severity,
            title: title.into(),
            description: description.into(),
            affected_records,
            sample_records: Vec::new(),
            suggested_actions: Vec::new(),
            derivation: String::new(),
            in_progress: false,
        }
    }

    /// A check that could not run (query error, timeout)
    pub fn execution_failure(category: CheckCategory, error: impl std::fmt::Display) -> Self {
        Self {
            category,
            check: format!("{}_check_failed", category.as_str()),
            severity: Severity::Critical,
            title: format!("{} check could not be completed", category.as_str()),
            description: error.to_string(),
            affected_records: 0,
            sample_records: Vec::new(),
            suggested_actions: vec![
                "Verify store connectivity and re-run the audit".to_string(),
            ],
            derivation: String::new(),
            in_progress: false,
        }
    }

    pub fn with_samples(mut self, samples: Vec<serde_json::Value>) -> Self {
        self.sample_records = samples;
        self
    }

    pub fn with_actions(mut self, actions: &[&str]) -> Self {
        self.suggested_actions = actions.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_derivation(mut self, derivation: impl Into<String>) -> Self {
        self.derivation = derivation.into();
        self
    }

    pub fn in_progress(mut self) -> Self {
        self.in_progress = true;
        self
    }
}

/// Overall audit verdict
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Critical,
    NeedsAttention,
    Healthy,
}

/// Counts per severity across an audit run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityCheckSummary {
    pub total_checks: usize,
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
    pub success: usize,
    pub overall_status: OverallStatus,
}

impl IntegrityCheckSummary {
    pub fn from_results(results: &[IntegrityCheckResult]) -> Self {
        let count = |s: Severity| results.iter().filter(|r| r.severity == s).count();
        let critical = count(Severity::Critical);
        let warning = count(Severity::Warning);
        let overall_status = if critical > 0 {
            OverallStatus::Critical
        } else if warning > 0 {
            OverallStatus::NeedsAttention
        } else {
            OverallStatus::Healthy
        };

        Self {
            total_checks: results.len(),
            critical,
            warning,
            info: count(Severity::Info),
            success: count(Severity::Success),
            overall_status,
        }
    }
}

/// Full output of one audit run
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub summary: IntegrityCheckSummary,
    pub results: Vec<IntegrityCheckResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    /// Opaque record returned by the store's diagnostic procedure
    pub store_diagnostics: Option<serde_json::Value>,
}

/// Flat row used for CSV export of results
#[derive(Debug, Serialize)]
pub struct IntegrityResultRow<'a> {
    pub category: &'static str,
    pub check: &'a str,
    pub severity: &'static str,
    pub title: &'a str,
    pub description: &'a str,
    pub affected_records: u64,
    pub in_progress: bool,
    pub suggested_actions: String,
}

impl<'a> From<&'a IntegrityCheckResult> for IntegrityResultRow<'a> {
    fn from(r: &'a IntegrityCheckResult) -> Self {
        Self {
            category: r.category.as_str(),
            check: &r.check,
            severity: r.severity.as_str(),
            title: &r.title,
            description: &r.description,
            affected_records: r.affected_records,
            in_progress: r.in_progress,
            suggested_actions: r.suggested_actions.join("; "),
        }
    }
}
