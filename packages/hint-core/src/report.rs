//! Finding collection and the finalized report.
//!
//! Findings are kept per resource in emission order; resources keep the
//! order in which the run first observed them. Ignore entries are applied
//! only when the report is finalized, so rules always run even for URLs
//! whose findings will be dropped.

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ConfigResolver;
use crate::dom::Element;
use crate::error::{HintError, Result};
use crate::severity::Severity;

/// One reported issue. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub resource: String,
    pub rule_id: String,
    pub message: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<Element>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_language: Option<String>,
}

impl Finding {
    pub fn new(
        resource: impl Into<String>,
        rule_id: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            resource: resource.into(),
            rule_id: rule_id.into(),
            message: message.into(),
            severity,
            element: None,
            code_snippet: None,
            code_language: None,
        }
    }
}

/// Findings of a completed run, ordered by resource then emission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Report {
    findings: Vec<Finding>,
}

impl Report {
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn into_findings(self) -> Vec<Finding> {
        self.findings
    }

    /// Distinct resources, in report order.
    pub fn resources(&self) -> Vec<&str> {
        let mut resources: Vec<&str> = Vec::new();
        for finding in &self.findings {
            if resources.last() != Some(&finding.resource.as_str()) {
                resources.push(&finding.resource);
            }
        }
        resources
    }

    pub fn for_resource<'a>(&'a self, resource: &'a str) -> impl Iterator<Item = &'a Finding> + 'a {
        self.findings.iter().filter(move |f| f.resource == resource)
    }

    pub fn for_rule<'a>(&'a self, rule_id: &'a str) -> impl Iterator<Item = &'a Finding> + 'a {
        self.findings.iter().filter(move |f| f.rule_id == rule_id)
    }

    /// Highest severity present, if any.
    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}

#[derive(Default)]
struct AggregatorState {
    by_resource: IndexMap<String, Vec<Finding>>,
    finalized: Option<Report>,
}

/// Collects findings during a run.
///
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct ReportAggregator {
    state: Arc<Mutex<AggregatorState>>,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the position of `resource` in the report without recording anything.
    pub fn observe_resource(&self, resource: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.finalized.is_none() && !state.by_resource.contains_key(resource) {
            state.by_resource.insert(resource.to_string(), Vec::new());
        }
    }

    /// Append a finding. Rejected once the report is finalized.
    pub fn record(&self, finding: Finding) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if state.finalized.is_some() {
            return Err(HintError::ReportClosed {
                rule_id: finding.rule_id,
                resource: finding.resource,
            });
        }

        debug!(
            rule = %finding.rule_id,
            resource = %finding.resource,
            severity = %finding.severity,
            "finding recorded"
        );

        state
            .by_resource
            .entry(finding.resource.clone())
            .or_default()
            .push(finding);
        Ok(())
    }

    /// Drop ignored findings and close the report. Idempotent.
    pub fn finalize(&self, resolver: &ConfigResolver) -> Report {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(report) = &state.finalized {
            return report.clone();
        }

        let recorded: usize = state.by_resource.values().map(Vec::len).sum();
        let findings: Vec<Finding> = state
            .by_resource
            .values()
            .flatten()
            .filter(|f| !resolver.is_ignored(&f.rule_id, &f.resource))
            .cloned()
            .collect();

        info!(
            recorded,
            reported = findings.len(),
            ignored = recorded - findings.len(),
            "report finalized"
        );

        let report = Report { findings };
        state.finalized = Some(report.clone());
        report
    }

    pub fn is_finalized(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .finalized
            .is_some()
    }

    /// Findings recorded so far, before ignore filtering.
    pub fn recorded(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_resource
            .values()
            .map(Vec::len)
            .sum()
    }
}

impl std::fmt::Debug for ReportAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportAggregator")
            .field("recorded", &self.recorded())
            .field("finalized", &self.is_finalized())
            .finish()
    }
}
