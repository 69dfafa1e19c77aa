use crate::models::report::Report;
use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tokio::sync::RwLock;

/// File-backed report persistence. Reports are opaque documents keyed by
/// generation timestamp; the BTreeMap keeps them chronological.
pub struct ReportStore {
    file_path: String,
    reports: RwLock<BTreeMap<String, Report>>,
}

impl ReportStore {
    pub fn new(file_path: &str) -> Result<Self> {
        let reports = if Path::new(file_path).exists() {
            let content = fs::read_to_string(file_path)?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            file_path: file_path.to_string(),
            reports: RwLock::new(reports),
        })
    }

    pub async fn save(&self, report: &Report) -> Result<String> {
        let key = report.generated_at.to_rfc3339();
        let mut reports = self.reports.write().await;
        reports.insert(key, report.clone());
        self.persist(&reports)?;
        Ok(report.id.clone())
    }

    pub async fn find_latest(&self) -> Option<Report> {
        let reports = self.reports.read().await;
        reports.values().next_back().cloned()
    }

    fn persist(&self, reports: &BTreeMap<String, Report>) -> Result<()> {
        let json = serde_json::to_string_pretty(reports)?;
        fs::write(&self.file_path, json)?;
        Ok(())
    }
}
