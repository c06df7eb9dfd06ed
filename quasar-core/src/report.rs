//! Versioned report document built from an archived session.

use std::collections::BTreeMap;

use quasar_model::{
    BackendId, FailureCause, Finding, ModuleId, SessionId, SessionSnapshot,
    SessionState, Severity, TargetId,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Version of the report document layout. Bumped whenever a consumer-visible
/// field changes meaning.
pub const REPORT_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub schema_version: String,
    pub session_id: SessionId,
    pub module_id: ModuleId,
    pub target_ref: TargetId,
    pub backend_id: BackendId,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureCause>,
    /// Highest severity across all findings; `None` without findings.
    pub overall_severity: Option<Severity>,
    pub severity_counts: BTreeMap<String, usize>,
    pub findings: Vec<Finding>,
}

impl Report {
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        let mut findings = snapshot.findings.clone();
        findings.sort_by_key(|finding| finding.sequence_number);

        let mut severity_counts: BTreeMap<String, usize> = Severity::ALL
            .iter()
            .map(|severity| (severity.as_str().to_string(), 0))
            .collect();
        for finding in &findings {
            *severity_counts
                .entry(finding.severity.as_str().to_string())
                .or_default() += 1;
        }

        Self {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            session_id: snapshot.session_id,
            module_id: snapshot.module_id.clone(),
            target_ref: snapshot.target_ref.clone(),
            backend_id: snapshot.backend_id.clone(),
            state: snapshot.state,
            cause: snapshot.cause.clone(),
            overall_severity: findings.iter().map(|f| f.severity).max(),
            severity_counts,
            findings,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use quasar_model::{FindingDraft, SNAPSHOT_SCHEMA_VERSION};

    use super::*;

    fn snapshot(findings: Vec<Finding>) -> SessionSnapshot {
        SessionSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            session_id: SessionId::new(),
            target_ref: TargetId::new("lab-host").unwrap(),
            module_id: ModuleId::new("auxiliary/algorithm_survey").unwrap(),
            backend_id: BackendId::new("local-simulator").unwrap(),
            state: SessionState::Completed,
            cause: None,
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            transitions: Vec::new(),
            findings,
        }
    }

    #[test]
    fn max_severity_wins_and_findings_are_ordered() {
        let session_id = SessionId::new();
        let findings = vec![
            FindingDraft::new(Severity::Low, "AES-256", "v1").seal(session_id, 3),
            FindingDraft::new(Severity::Critical, "RC4", "v1").seal(session_id, 1),
            FindingDraft::new(Severity::High, "RSA", "v1").seal(session_id, 2),
        ];
        let report = Report::from_snapshot(&snapshot(findings));

        assert_eq!(report.overall_severity, Some(Severity::Critical));
        let order: Vec<u64> = report.findings.iter().map(|f| f.sequence_number).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(report.severity_counts["critical"], 1);
        assert_eq!(report.severity_counts["medium"], 0);
    }

    #[test]
    fn empty_report_has_no_overall_severity() {
        let report = Report::from_snapshot(&snapshot(Vec::new()));
        assert_eq!(report.overall_severity, None);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["schema_version"], "1.0");
        assert!(json["overall_severity"].is_null());
        assert_eq!(json["state"], "completed");
    }
}
