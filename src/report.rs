//! The serialized outcome of a validation.
//!
//! Everything here is plain data built from the pipeline stages. Field order is
//! fixed and no map types appear, so the same inputs always serialize to the
//! same bytes.

use crate::reach::{Budget, PathEdge, Reachability, RootAttempt};
use crate::resolve::ResolutionResult;
use crate::root::RootExtraction;
use crate::validate::ValidateOptions;
use crate::verify::FlowVerification;
use serde::Serialize;

/// Non-fatal findings collected while validating.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Several participants qualified as the root.
    AmbiguousRoot {
        chosen: String,
        candidates: Vec<String>,
    },
    /// The root participant had neither function_name nor name.
    KeyAsSymbol { participant_key: String },
    /// The root symbol matched more than one indexed symbol.
    AmbiguousResolution { symbol: String, count: usize },
    UnresolvedSymbol { symbol: String },
    /// The reported path relies on edges at or below the weak threshold.
    WeakEvidence { edges: usize, threshold: f64 },
    Truncated { budget: Budget },
    /// Calls declared by the flow that the index has no edge for.
    PhantomCalls { count: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationVerdict {
    /// Root name the reported path starts from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    pub target: String,
    pub reachable: bool,
    pub path: Vec<String>,
    pub hops: usize,
    pub confidence: f64,
    pub unresolved: bool,
    pub truncated: bool,
    pub edges: Vec<PathEdge>,
    pub weak_edges: Vec<PathEdge>,
    pub explored: usize,
    /// Call edges skipped because their callee lives in another project.
    #[serde(skip_serializing_if = "is_zero")]
    pub out_of_scope_edges: usize,
    pub attempts: Vec<RootAttempt>,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

impl ValidationVerdict {
    /// The root never reached the index, so nothing was traversed.
    pub fn unresolved(target: &str) -> Self {
        Self {
            root: None,
            target: target.to_string(),
            reachable: false,
            path: Vec::new(),
            hops: 0,
            confidence: 0.0,
            unresolved: true,
            truncated: false,
            edges: Vec::new(),
            weak_edges: Vec::new(),
            explored: 0,
            out_of_scope_edges: 0,
            attempts: Vec::new(),
        }
    }

    pub fn from_reachability(reach: Reachability) -> Self {
        let best = reach.best;
        Self {
            root: if best.root.is_empty() {
                None
            } else {
                Some(best.root)
            },
            target: reach.target,
            reachable: best.reachable,
            path: best.path,
            hops: best.hops,
            confidence: best.confidence,
            unresolved: false,
            truncated: reach.truncated,
            edges: best.edges,
            weak_edges: reach.weak_edges,
            explored: best.explored,
            out_of_scope_edges: reach.out_of_scope_edges,
            attempts: reach.attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub flow_key: String,
    pub flow_name: String,
    pub target: String,
    pub root: RootExtraction,
    pub resolution: ResolutionResult,
    pub verdict: ValidationVerdict,
    pub verification: FlowVerification,
    pub warnings: Vec<Warning>,
    pub options: ValidateOptions,
}

impl ValidationReport {
    /// Reachable, resolved and not built on weak evidence.
    pub fn trusted(&self) -> bool {
        self.verdict.reachable && !self.verdict.unresolved && self.verdict.weak_edges.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
