//! Per-edge verification of the CALLS a flow declares.
//!
//! Every declared caller/callee pair is looked up in the static index. Pairs
//! the index also has are confirmed, pairs it lacks are phantom, and index
//! edges between two participants that the flow never declared are missing.
//! The flow as a whole is only as trustworthy as its weakest declared edge.

use crate::error::{ValidateError, ValidateResult};
use crate::model::{CallEdge, FlowParticipant};
use crate::resolve::Resolver;
use crate::root::participant_symbol;
use crate::scope::ProjectScope;
use crate::source::{FlowGraph, StaticIndex, name_key};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Trust given to a declared call the index has no evidence for.
pub const PHANTOM_TRUST: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeClass {
    /// Declared by the flow and present in the index.
    Confirmed,
    /// Declared by the flow, absent from the index.
    Phantom,
    /// Present in the index between two participants, not declared.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedEdge {
    pub caller_key: String,
    pub callee_key: String,
    pub caller: String,
    pub callee: String,
    pub class: EdgeClass,
    pub trust: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowVerification {
    pub edges: Vec<VerifiedEdge>,
    pub confirmed: usize,
    pub phantom: usize,
    pub missing: usize,
    /// Lowest trust among declared edges, 0.0 when none are declared.
    pub flow_trust: f64,
    /// Mean trust of declared edges.
    pub graph_trust: f64,
}

impl FlowVerification {
    fn from_edges(mut edges: Vec<VerifiedEdge>) -> Self {
        edges.sort_by(|a, b| {
            a.caller_key
                .cmp(&b.caller_key)
                .then_with(|| a.callee_key.cmp(&b.callee_key))
        });
        let count = |class: EdgeClass| edges.iter().filter(|e| e.class == class).count();
        let declared: Vec<f64> = edges
            .iter()
            .filter(|e| e.class != EdgeClass::Missing)
            .map(|e| e.trust)
            .collect();
        let flow_trust = declared.iter().copied().reduce(f64::min).unwrap_or(0.0);
        let graph_trust = if declared.is_empty() {
            0.0
        } else {
            declared.iter().sum::<f64>() / declared.len() as f64
        };
        Self {
            confirmed: count(EdgeClass::Confirmed),
            phantom: count(EdgeClass::Phantom),
            missing: count(EdgeClass::Missing),
            edges,
            flow_trust,
            graph_trust,
        }
    }
}

/// Index names a participant may appear under: its own symbol plus what it
/// unambiguously resolves to.
struct Participant {
    symbol: String,
    names: Vec<String>,
}

struct Verifier<'a> {
    index: &'a dyn StaticIndex,
    outgoing: HashMap<String, Vec<CallEdge>>,
}

impl Verifier<'_> {
    fn edges_of(&mut self, caller: &str) -> ValidateResult<&[CallEdge]> {
        let key = name_key(caller);
        if !self.outgoing.contains_key(&key) {
            let edges = self
                .index
                .outgoing_edges(caller)
                .map_err(ValidateError::index_unavailable)?;
            self.outgoing.insert(key.clone(), edges);
        }
        Ok(self.outgoing.get(&key).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Strongest index edge from any of `caller`'s names to any of `callee`'s.
    fn strongest(&mut self, caller: &Participant, callee: &Participant) -> ValidateResult<Option<f64>> {
        let targets: BTreeSet<String> = callee.names.iter().map(|n| name_key(n)).collect();
        let mut best: Option<f64> = None;
        for name in &caller.names {
            for edge in self.edges_of(name)? {
                if targets.contains(&name_key(&edge.callee)) {
                    let confidence = edge.confidence.clamp(0.0, 1.0);
                    best = Some(best.map_or(confidence, |b| b.max(confidence)));
                }
            }
        }
        Ok(best)
    }
}

fn participant_names(
    index: &dyn StaticIndex,
    resolver: &Resolver,
    scope: Option<&ProjectScope>,
    participant: &FlowParticipant,
) -> ValidateResult<Participant> {
    let (symbol, _) = participant_symbol(participant);
    let resolution = resolver.resolve_scoped(
        index,
        &symbol,
        participant.class_name.as_deref(),
        scope,
    )?;
    let mut names = vec![symbol.clone()];
    if resolution.is_resolved() && !resolution.ambiguous {
        for name in resolution.root_names() {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                names.push(name);
            }
        }
    }
    Ok(Participant { symbol, names })
}

/// Classify every CALLS edge of `flow_key` against the index.
pub fn verify_flow(
    index: &dyn StaticIndex,
    flows: &dyn FlowGraph,
    resolver: &Resolver,
    flow_key: &str,
    scope: Option<&ProjectScope>,
) -> ValidateResult<FlowVerification> {
    let flow_key = flow_key.trim();
    let participants = flows
        .participants(flow_key)
        .map_err(ValidateError::flow_graph_unavailable)?;
    let calls = flows
        .calls(flow_key)
        .map_err(ValidateError::flow_graph_unavailable)?;
    if participants.is_empty() && calls.is_empty() {
        let exists = flows
            .flow(flow_key)
            .map_err(ValidateError::flow_graph_unavailable)?
            .is_some();
        if !exists {
            return Err(ValidateError::FlowNotFound {
                flow_key: flow_key.to_string(),
            });
        }
    }

    let mut known: HashMap<String, Participant> = HashMap::new();
    for participant in &participants {
        if !known.contains_key(&participant.key) {
            let resolved = participant_names(index, resolver, scope, participant)?;
            known.insert(participant.key.clone(), resolved);
        }
    }
    // keys the flow calls but never lists stand for themselves
    for call in &calls {
        for key in [&call.caller_key, &call.callee_key] {
            known.entry(key.clone()).or_insert_with(|| Participant {
                symbol: key.clone(),
                names: vec![key.clone()],
            });
        }
    }

    let mut verifier = Verifier {
        index,
        outgoing: HashMap::new(),
    };
    let mut edges: Vec<VerifiedEdge> = Vec::new();
    let mut declared: BTreeSet<(String, String)> = BTreeSet::new();
    for call in &calls {
        if !declared.insert((call.caller_key.clone(), call.callee_key.clone())) {
            continue;
        }
        let (Some(caller), Some(callee)) = (known.get(&call.caller_key), known.get(&call.callee_key))
        else {
            continue;
        };
        let (class, trust) = match verifier.strongest(caller, callee)? {
            Some(confidence) => (EdgeClass::Confirmed, confidence),
            None => (EdgeClass::Phantom, PHANTOM_TRUST),
        };
        edges.push(VerifiedEdge {
            caller_key: call.caller_key.clone(),
            callee_key: call.callee_key.clone(),
            caller: caller.symbol.clone(),
            callee: callee.symbol.clone(),
            class,
            trust,
        });
    }

    let mut keys: Vec<&String> = participants.iter().map(|p| &p.key).collect();
    keys.sort();
    keys.dedup();
    for caller_key in &keys {
        for callee_key in &keys {
            if caller_key == callee_key
                || declared.contains(&((*caller_key).clone(), (*callee_key).clone()))
            {
                continue;
            }
            let (Some(caller), Some(callee)) = (known.get(*caller_key), known.get(*callee_key))
            else {
                continue;
            };
            let same_name = caller
                .names
                .iter()
                .any(|n| callee.names.iter().any(|m| n.eq_ignore_ascii_case(m)));
            if same_name || verifier.strongest(caller, callee)?.is_none() {
                continue;
            }
            edges.push(VerifiedEdge {
                caller_key: (*caller_key).clone(),
                callee_key: (*callee_key).clone(),
                caller: caller.symbol.clone(),
                callee: callee.symbol.clone(),
                class: EdgeClass::Missing,
                trust: 0.0,
            });
        }
    }

    let verification = FlowVerification::from_edges(edges);
    tracing::debug!(
        flow_key,
        confirmed = verification.confirmed,
        phantom = verification.phantom,
        missing = verification.missing,
        "flow edges verified"
    );
    Ok(verification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionFlow, FlowCall, IndexedSymbol, ParticipantType};
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

    fn participant(key: &str, function_name: &str) -> FlowParticipant {
        FlowParticipant {
            key: key.to_string(),
            kind: ParticipantType::Ordinary,
            function_name: Some(function_name.to_string()),
            name: None,
            class_name: None,
            file_path: "Unit1.pas".to_string(),
            file_name: "Unit1.pas".to_string(),
            starts_flow: false,
        }
    }

    fn call(caller: &str, callee: &str) -> FlowCall {
        FlowCall {
            caller_key: caller.to_string(),
            callee_key: callee.to_string(),
        }
    }

    fn index() -> MemoryIndex {
        MemoryIndex::new(
            vec![
                symbol(1, "TForm1", Some("TForm1")),
                symbol(2, "Button2Click", Some("TForm1")),
                symbol(3, "SaveRecord", None),
                symbol(4, "LogLine", None),
            ],
            vec![
                edge("TForm1", "Button2Click", 0.9),
                edge("Button2Click", "SaveRecord", 0.6),
                edge("SaveRecord", "LogLine", 0.7),
            ],
        )
    }

    fn flows(participants: Vec<FlowParticipant>, calls: Vec<FlowCall>) -> MemoryFlowGraph {
        let mut flows = MemoryFlowGraph::new();
        flows.insert_flow(
            ExecutionFlow {
                key: "EF-1".to_string(),
                name: String::new(),
            },
            participants,
            calls,
        );
        flows
    }

    #[test]
    fn declared_edges_are_confirmed_or_phantom() {
        let mut root = participant("s1", "");
        root.function_name = None;
        root.name = Some("Form1".to_string());
        let flows = flows(
            vec![root, participant("s2", "Button2Click"), participant("s3", "SaveRecord")],
            vec![call("s1", "s2"), call("s1", "s3")],
        );
        let resolver = Resolver::standard(&["T".to_string()]);
        let result = verify_flow(&index(), &flows, &resolver, "EF-1", None).unwrap();

        assert_eq!(result.confirmed, 1);
        assert_eq!(result.phantom, 1);
        // s2 -> s3 is in the index but was never declared
        assert_eq!(result.missing, 1);
        assert_eq!(result.edges[0].class, EdgeClass::Confirmed);
        assert_eq!(result.edges[0].caller, "Form1");
        assert_eq!(result.edges[0].trust, 0.9);
        assert_eq!(result.edges[1].class, EdgeClass::Phantom);
        assert_eq!(result.edges[1].trust, PHANTOM_TRUST);
        assert_eq!(result.flow_trust, PHANTOM_TRUST);
        assert!((result.graph_trust - 0.55).abs() < 1e-9);
    }

    #[test]
    fn undeclared_index_edges_between_participants_are_missing() {
        let flows = flows(
            vec![
                participant("a", "Button2Click"),
                participant("b", "SaveRecord"),
                participant("c", "LogLine"),
            ],
            vec![call("a", "b")],
        );
        let resolver = Resolver::standard(&["T".to_string()]);
        let result = verify_flow(&index(), &flows, &resolver, "EF-1", None).unwrap();

        assert_eq!(result.confirmed, 1);
        assert_eq!(result.missing, 1);
        let missing = result
            .edges
            .iter()
            .find(|e| e.class == EdgeClass::Missing)
            .unwrap();
        assert_eq!((missing.caller_key.as_str(), missing.callee_key.as_str()), ("b", "c"));
        assert_eq!(missing.trust, 0.0);
        // missing edges do not drag the flow score down
        assert_eq!(result.flow_trust, 0.6);
    }

    #[test]
    fn flow_without_calls_scores_zero() {
        let flows = flows(vec![participant("a", "SaveRecord")], Vec::new());
        let resolver = Resolver::standard(&["T".to_string()]);
        let result = verify_flow(&index(), &flows, &resolver, "EF-1", None).unwrap();
        assert!(result.edges.is_empty());
        assert_eq!(result.flow_trust, 0.0);

        let err = verify_flow(&index(), &flows, &resolver, "EF-9", None).unwrap_err();
        assert_eq!(err.kind(), "flow_not_found");
    }
}
