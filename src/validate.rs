//! The validation pipeline: root extraction, symbol resolution, reachability
//! and verification of the flow's declared calls.

use crate::config::Config;
use crate::error::{ValidateError, ValidateResult};
use crate::reach::{ReachOptions, check_reachability_scoped};
use crate::report::{ValidationReport, ValidationVerdict, Warning};
use crate::resolve::Resolver;
use crate::root::extract_root;
use crate::scope::ProjectScope;
use crate::source::{FlowGraph, StaticIndex};
use crate::verify::verify_flow;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-request knobs. Defaults come from [`Config`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidateOptions {
    pub class_prefixes: Vec<String>,
    pub min_confidence: f64,
    pub weak_threshold: f64,
    pub max_hops: usize,
    pub max_visited: usize,
    pub timeout_ms: u64,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ValidateOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            class_prefixes: config.class_prefixes.clone(),
            min_confidence: 0.0,
            weak_threshold: config.weak_threshold,
            max_hops: config.max_hops,
            max_visited: config.max_visited,
            timeout_ms: config.timeout_ms,
        }
    }

    pub fn reach_options(&self) -> ReachOptions {
        ReachOptions {
            min_confidence: self.min_confidence,
            weak_threshold: self.weak_threshold,
            max_hops: self.max_hops,
            max_visited: self.max_visited,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }

    pub fn check(&self) -> ValidateResult<()> {
        if self.class_prefixes.iter().any(|p| p.trim().is_empty()) {
            return Err(ValidateError::InvalidOptions(
                "class prefixes must not be blank".to_string(),
            ));
        }
        self.reach_options().check()
    }
}

/// Per-request overrides, as accepted by the CLI and the RPC methods.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, schemars::JsonSchema)]
pub struct OptionOverrides {
    /// Implementation-class prefixes tried for bare names (default ["T"])
    pub class_prefixes: Option<Vec<String>>,
    /// Edges must exceed this confidence to be traversed (default 0.0)
    pub min_confidence: Option<f64>,
    /// Traversed edges at or below this confidence are weak evidence
    pub weak_threshold: Option<f64>,
    pub max_hops: Option<usize>,
    pub max_visited: Option<usize>,
    pub timeout_ms: Option<u64>,
}

impl OptionOverrides {
    pub fn apply(&self, mut base: ValidateOptions) -> ValidateOptions {
        if let Some(prefixes) = &self.class_prefixes {
            base.class_prefixes = prefixes.clone();
        }
        if let Some(value) = self.min_confidence {
            base.min_confidence = value;
        }
        if let Some(value) = self.weak_threshold {
            base.weak_threshold = value;
        }
        if let Some(value) = self.max_hops {
            base.max_hops = value;
        }
        if let Some(value) = self.max_visited {
            base.max_visited = value;
        }
        if let Some(value) = self.timeout_ms {
            base.timeout_ms = value;
        }
        base
    }
}

/// Validates flows against one pair of sources.
pub struct Validator<'a> {
    index: &'a dyn StaticIndex,
    flows: &'a dyn FlowGraph,
    options: ValidateOptions,
    resolver: Resolver,
}

impl<'a> Validator<'a> {
    pub fn new(
        index: &'a dyn StaticIndex,
        flows: &'a dyn FlowGraph,
        options: ValidateOptions,
    ) -> ValidateResult<Self> {
        options.check()?;
        let resolver = Resolver::standard(&options.class_prefixes);
        Ok(Self {
            index,
            flows,
            options,
            resolver,
        })
    }

    /// Replace the resolver, e.g. with a custom strategy chain.
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn options(&self) -> &ValidateOptions {
        &self.options
    }

    pub fn validate(&self, flow_key: &str, target: &str) -> ValidateResult<ValidationReport> {
        let flow_key = flow_key.trim();
        let target = target.trim();
        if target.is_empty() {
            return Err(ValidateError::InvalidOptions(
                "target must not be empty".to_string(),
            ));
        }

        let root = extract_root(self.flows, flow_key)?;
        let flow_name = self
            .flows
            .flow(flow_key)
            .map_err(ValidateError::flow_graph_unavailable)?
            .map(|flow| flow.name)
            .unwrap_or_default();

        let scope = ProjectScope::derive(self.index, &root.file_path)?;
        let resolution = self.resolver.resolve_scoped(
            self.index,
            &root.symbol,
            root.class_name.as_deref(),
            scope.as_ref(),
        )?;

        let mut warnings = root.warnings.clone();
        if resolution.ambiguous {
            warnings.push(Warning::AmbiguousResolution {
                symbol: root.symbol.clone(),
                count: resolution.matches.len(),
            });
        }

        let verdict = if resolution.is_resolved() {
            let reach = check_reachability_scoped(
                self.index,
                &resolution.root_names(),
                target,
                &self.options.reach_options(),
                scope.as_ref(),
            )?;
            if let Some(budget) = reach.budget {
                warnings.push(Warning::Truncated { budget });
            }
            if !reach.weak_edges.is_empty() {
                warnings.push(Warning::WeakEvidence {
                    edges: reach.weak_edges.len(),
                    threshold: self.options.weak_threshold,
                });
            }
            ValidationVerdict::from_reachability(reach)
        } else {
            warnings.push(Warning::UnresolvedSymbol {
                symbol: root.symbol.clone(),
            });
            ValidationVerdict::unresolved(target)
        };

        let verification = verify_flow(
            self.index,
            self.flows,
            &self.resolver,
            flow_key,
            scope.as_ref(),
        )?;
        if verification.phantom > 0 {
            warnings.push(Warning::PhantomCalls {
                count: verification.phantom,
            });
        }

        tracing::info!(
            flow_key,
            goal = target,
            method = resolution.method.as_str(),
            reachable = verdict.reachable,
            confidence = verdict.confidence,
            truncated = verdict.truncated,
            "flow validated"
        );

        Ok(ValidationReport {
            flow_key: flow_key.to_string(),
            flow_name,
            target: target.to_string(),
            root,
            resolution,
            verdict,
            verification,
            warnings,
            options: self.options.clone(),
        })
    }
}

/// Validate one flow against `target` with the standard resolver.
pub fn validate(
    index: &dyn StaticIndex,
    flows: &dyn FlowGraph,
    flow_key: &str,
    target: &str,
    options: &ValidateOptions,
) -> ValidateResult<ValidationReport> {
    Validator::new(index, flows, options.clone())?.validate(flow_key, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CallEdge, ExecutionFlow, FlowParticipant, IndexedSymbol, ParticipantType,
    };
    use crate::source::{MemoryFlowGraph, MemoryIndex};

    fn symbol(id: i64, name: &str, class_name: Option<&str>) -> IndexedSymbol {
        IndexedSymbol {
            id,
            function_name: name.to_string(),
            file_path: "Unit1.pas".to_string(),
            class_name: class_name.map(String::from),
            language: "delphi".to_string(),
        }
    }

    fn edge(caller: &str, callee: &str, confidence: f64) -> CallEdge {
        CallEdge {
            caller: caller.to_string(),
            callee: callee.to_string(),
            confidence,
        }
    }

    fn root_participant(key: &str, name: &str) -> FlowParticipant {
        FlowParticipant {
            key: key.to_string(),
            kind: ParticipantType::Root,
            function_name: None,
            name: Some(name.to_string()),
            class_name: None,
            file_path: "Unit1.pas".to_string(),
            file_name: "Unit1.pas".to_string(),
            starts_flow: true,
        }
    }

    fn fixture() -> (MemoryIndex, MemoryFlowGraph) {
        let index = MemoryIndex::new(
            vec![
                symbol(1, "TForm1", Some("TForm1")),
                symbol(2, "Button2Click", Some("TForm1")),
                symbol(3, "SaveRecord", None),
            ],
            vec![
                edge("TForm1", "Button2Click", 0.9),
                edge("Button2Click", "SaveRecord", 0.6),
                edge("TForm1", "SaveRecord", 0.05),
            ],
        );
        let mut flows = MemoryFlowGraph::new();
        flows.insert_flow(
            ExecutionFlow {
                key: "EF-1".to_string(),
                name: "Save from form".to_string(),
            },
            vec![root_participant("p1", "Form1")],
            Vec::new(),
        );
        flows.insert_flow(
            ExecutionFlow {
                key: "EF-2".to_string(),
                name: "Unknown root".to_string(),
            },
            vec![root_participant("p2", "NoSuchFunction123")],
            Vec::new(),
        );
        (index, flows)
    }

    #[test]
    fn form_root_reaches_target_through_prefixed_class() {
        let (index, flows) = fixture();
        let report =
            validate(&index, &flows, "EF-1", "SaveRecord", &ValidateOptions::default()).unwrap();
        assert_eq!(report.flow_name, "Save from form");
        assert_eq!(report.root.symbol, "Form1");
        assert_eq!(
            report.resolution.method,
            crate::resolve::MatchMethod::ClassPrefixFallback
        );
        assert!(report.verdict.reachable);
        assert_eq!(report.verdict.root.as_deref(), Some("TForm1"));
        assert_eq!(
            report.verdict.path,
            vec!["TForm1", "Button2Click", "SaveRecord"]
        );
        assert_eq!(report.verdict.confidence, 0.6);
        assert!(report.warnings.is_empty());
        assert!(report.trusted());
    }

    #[test]
    fn unresolved_root_is_a_verdict_not_an_error() {
        let (index, flows) = fixture();
        let report =
            validate(&index, &flows, "EF-2", "SaveRecord", &ValidateOptions::default()).unwrap();
        assert!(report.verdict.unresolved);
        assert!(!report.verdict.reachable);
        assert!(matches!(
            report.warnings.last(),
            Some(Warning::UnresolvedSymbol { .. })
        ));
    }

    #[test]
    fn repeated_validation_serializes_identically() {
        let (index, flows) = fixture();
        let options = ValidateOptions::default();
        let first = validate(&index, &flows, "EF-1", "SaveRecord", &options)
            .unwrap()
            .to_json()
            .unwrap();
        let second = validate(&index, &flows, "EF-1", "SaveRecord", &options)
            .unwrap()
            .to_json()
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn weak_only_path_is_flagged() {
        let (index, flows) = fixture();
        let options = ValidateOptions {
            min_confidence: 0.0,
            max_hops: 1,
            ..ValidateOptions::default()
        };
        let report = validate(&index, &flows, "EF-1", "SaveRecord", &options).unwrap();
        assert!(report.verdict.reachable);
        assert_eq!(report.verdict.confidence, 0.05);
        assert_eq!(report.verdict.weak_edges.len(), 1);
        assert!(!report.trusted());
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::WeakEvidence { edges: 1, .. })));
    }

    #[test]
    fn root_file_scopes_resolution_and_callees() {
        let scoped = |id: i64, name: &str, class_name: Option<&str>, path: &str| IndexedSymbol {
            file_path: path.to_string(),
            ..symbol(id, name, class_name)
        };
        let index = MemoryIndex::new(
            vec![
                scoped(10, "Execute", Some("TJob"), "billing/src/Job.pas"),
                scoped(11, "Execute", Some("TJob"), "payroll/src/Job.pas"),
                scoped(12, "SaveInvoice", None, "billing/src/Invoice.pas"),
                scoped(13, "SavePayslip", None, "payroll/src/Payslip.pas"),
            ],
            vec![
                edge("Execute", "SaveInvoice", 0.8),
                edge("Execute", "SavePayslip", 0.8),
            ],
        );
        let mut root = root_participant("p1", "Execute");
        root.class_name = Some("TJob".to_string());
        root.file_path = "C:\\work\\billing\\src\\Job.pas".to_string();
        root.file_name = "Job.pas".to_string();
        let mut flows = MemoryFlowGraph::new();
        flows.insert_flow(
            ExecutionFlow {
                key: "EF-JOB".to_string(),
                name: "Nightly billing".to_string(),
            },
            vec![root],
            Vec::new(),
        );
        let options = ValidateOptions::default();

        let report = validate(&index, &flows, "EF-JOB", "SaveInvoice", &options).unwrap();
        assert_eq!(report.resolution.scope.as_ref().map(|s| s.prefix()), Some("billing"));
        assert!(report.resolution.narrowed_by_scope);
        assert!(!report.resolution.ambiguous);
        assert_eq!(report.resolution.matches[0].id, 10);
        assert!(report.verdict.reachable);
        assert_eq!(report.verdict.confidence, 0.8);

        let report = validate(&index, &flows, "EF-JOB", "SavePayslip", &options).unwrap();
        assert!(!report.verdict.reachable);
        assert!(!report.verdict.truncated);
        assert_eq!(report.verdict.out_of_scope_edges, 1);
        assert!(!report
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::AmbiguousResolution { .. })));
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let overrides = OptionOverrides {
            max_hops: Some(3),
            class_prefixes: Some(vec!["C".to_string()]),
            ..OptionOverrides::default()
        };
        let options = overrides.apply(ValidateOptions::default());
        assert_eq!(options.max_hops, 3);
        assert_eq!(options.class_prefixes, vec!["C".to_string()]);
        assert_eq!(options.max_visited, ValidateOptions::default().max_visited);
    }

    #[test]
    fn missing_flow_and_bad_options_are_typed_errors() {
        let (index, flows) = fixture();
        let err = validate(&index, &flows, "EF-9", "SaveRecord", &ValidateOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), "flow_not_found");

        let options = ValidateOptions {
            weak_threshold: -0.5,
            ..ValidateOptions::default()
        };
        let err = validate(&index, &flows, "EF-1", "SaveRecord", &options).unwrap_err();
        assert_eq!(err.kind(), "invalid_options");

        let err =
            validate(&index, &flows, "EF-1", "  ", &ValidateOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "invalid_options");
    }
}
