//! Many independent validations over shared read-only sources.

use crate::error::SourceKind;
use crate::report::ValidationReport;
use crate::source::{FlowGraph, StaticIndex};
use crate::validate::{ValidateOptions, Validator};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BatchRequest {
    pub flow_key: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceKind>,
    pub message: String,
}

/// One entry per request, in request order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub flow_key: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ValidationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub reachable: usize,
    pub unreachable: usize,
    pub unresolved: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn of(outcomes: &[BatchOutcome]) -> Self {
        let mut summary = BatchSummary {
            total: outcomes.len(),
            ..BatchSummary::default()
        };
        for outcome in outcomes {
            match &outcome.report {
                None => summary.failed += 1,
                Some(report) if report.verdict.unresolved => summary.unresolved += 1,
                Some(report) if report.verdict.reachable => summary.reachable += 1,
                Some(_) => summary.unreachable += 1,
            }
        }
        summary
    }
}

/// Validate every request in parallel. A failing request does not stop the
/// others; option errors fail the whole batch up front.
pub fn validate_batch(
    index: &dyn StaticIndex,
    flows: &dyn FlowGraph,
    requests: &[BatchRequest],
    options: &ValidateOptions,
) -> crate::error::ValidateResult<Vec<BatchOutcome>> {
    let validator = Validator::new(index, flows, options.clone())?;
    let outcomes: Vec<BatchOutcome> = requests
        .par_iter()
        .map(|request| {
            let mut outcome = BatchOutcome {
                flow_key: request.flow_key.clone(),
                target: request.target.clone(),
                report: None,
                error: None,
            };
            match validator.validate(&request.flow_key, &request.target) {
                Ok(report) => outcome.report = Some(report),
                Err(err) => {
                    tracing::warn!(
                        flow_key = %request.flow_key,
                        goal = %request.target,
                        kind = err.kind(),
                        "batch entry failed: {err}"
                    );
                    outcome.error = Some(BatchFailure {
                        kind: err.kind(),
                        source: err.source_kind(),
                        message: err.to_string(),
                    });
                }
            }
            outcome
        })
        .collect();
    tracing::debug!(requests = requests.len(), "batch validated");
    Ok(outcomes)
}
