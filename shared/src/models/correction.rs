//! Correction run models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::CheckCategory;

/// Categories the correction engine knows how to repair
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionCategory {
    /// Recompute order totals from their items
    Financial,
    /// Recompute remaining-amount caches and order statuses
    Delivery,
    /// Recompute product stock from the movement log
    Inventory,
}

impl CorrectionCategory {
    /// Execution order of a full fix; delivery depends on corrected totals
    pub const ALL: [CorrectionCategory; 3] = [
        CorrectionCategory::Financial,
        CorrectionCategory::Delivery,
        CorrectionCategory::Inventory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionCategory::Financial => "financial",
            CorrectionCategory::Delivery => "delivery",
            CorrectionCategory::Inventory => "inventory",
        }
    }

    /// Tables snapshotted before this category is corrected
    pub fn affected_tables(&self) -> &'static [&'static str] {
        match self {
            CorrectionCategory::Financial => &["purchase_orders"],
            CorrectionCategory::Delivery => &["purchase_orders"],
            CorrectionCategory::Inventory => &["products"],
        }
    }

    pub fn check_category(&self) -> CheckCategory {
        match self {
            CorrectionCategory::Financial => CheckCategory::Financial,
            CorrectionCategory::Delivery => CheckCategory::Delivery,
            CorrectionCategory::Inventory => CheckCategory::Inventory,
        }
    }
}

/// Request body for a correction run; `None` runs every category
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrectionRequest {
    pub category: Option<CorrectionCategory>,
}

impl CorrectionRequest {
    pub fn categories(&self) -> Vec<CorrectionCategory> {
        match self.category {
            Some(c) => vec![c],
            None => CorrectionCategory::ALL.to_vec(),
        }
    }
}

/// Result of one sub-fix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryOutcome {
    pub category: CorrectionCategory,
    pub rows_fixed: u64,
    pub error: Option<String>,
}

/// Result of a correction run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionReport {
    /// Restore point taken before any write
    pub backup_id: Uuid,
    pub backup_created_at: DateTime<Utc>,
    pub outcomes: Vec<CategoryOutcome>,
    pub total_rows_fixed: u64,
    pub failed_categories: usize,
}

impl CorrectionReport {
    pub fn new(backup_id: Uuid, backup_created_at: DateTime<Utc>, outcomes: Vec<CategoryOutcome>) -> Self {
        let total_rows_fixed = outcomes.iter().map(|o| o.rows_fixed).sum();
        let failed_categories = outcomes.iter().filter(|o| o.error.is_some()).count();
        Self {
            backup_id,
            backup_created_at,
            outcomes,
            total_rows_fixed,
            failed_categories,
        }
    }
}

/// Backup listing entry (snapshot payload omitted)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSummary {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub categories: Vec<String>,
    pub tables: Vec<String>,
}
