//! Root extraction: pick the single participant a flow starts from.

use crate::error::{ValidateError, ValidateResult};
use crate::model::{FlowParticipant, ParticipantType};
use crate::report::Warning;
use crate::source::FlowGraph;
use serde::Serialize;

/// Which rule picked the root participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RootSelection {
    /// type=ROOT and starts_flow=true
    RootStartsFlow,
    /// starts_flow=true, any type
    StartsFlow,
}

/// Which participant field supplied the root symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolSource {
    FunctionName,
    Name,
    Key,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RootExtraction {
    pub participant_key: String,
    pub symbol: String,
    pub symbol_source: SymbolSource,
    pub selection: RootSelection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub file_path: String,
    /// CALLS edges leaving the root inside the flow itself.
    pub flow_out_degree: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Symbol string for a participant: function_name, then name, then key.
pub fn participant_symbol(participant: &FlowParticipant) -> (String, SymbolSource) {
    if let Some(function_name) = non_empty(participant.function_name.as_deref()) {
        return (function_name.to_string(), SymbolSource::FunctionName);
    }
    if let Some(name) = non_empty(participant.name.as_deref()) {
        return (name.to_string(), SymbolSource::Name);
    }
    (participant.key.clone(), SymbolSource::Key)
}

/// Choose the root among `participants` without touching any store.
pub fn select_root(
    flow_key: &str,
    participants: &[FlowParticipant],
) -> ValidateResult<(FlowParticipant, RootSelection, Vec<Warning>)> {
    let mut declared: Vec<&FlowParticipant> = participants
        .iter()
        .filter(|p| p.starts_flow && p.kind == ParticipantType::Root)
        .collect();
    let mut selection = RootSelection::RootStartsFlow;
    if declared.is_empty() {
        declared = participants.iter().filter(|p| p.starts_flow).collect();
        selection = RootSelection::StartsFlow;
    }
    if declared.is_empty() {
        return Err(ValidateError::NoRootFound {
            flow_key: flow_key.to_string(),
        });
    }

    declared.sort_by(|a, b| a.key.cmp(&b.key));
    declared.dedup_by(|a, b| a.key == b.key);

    let mut warnings = Vec::new();
    if declared.len() > 1 {
        warnings.push(Warning::AmbiguousRoot {
            chosen: declared[0].key.clone(),
            candidates: declared.iter().map(|p| p.key.clone()).collect(),
        });
    }
    Ok((declared[0].clone(), selection, warnings))
}

/// Read the flow's participants and extract its root symbol.
pub fn extract_root(flows: &dyn FlowGraph, flow_key: &str) -> ValidateResult<RootExtraction> {
    let participants = flows
        .participants(flow_key)
        .map_err(ValidateError::flow_graph_unavailable)?;
    if participants.is_empty() {
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

    let (root, selection, mut warnings) = select_root(flow_key, &participants)?;
    let (symbol, symbol_source) = participant_symbol(&root);
    if symbol_source == SymbolSource::Key {
        warnings.push(Warning::KeyAsSymbol {
            participant_key: root.key.clone(),
        });
    }

    let calls = flows
        .calls(flow_key)
        .map_err(ValidateError::flow_graph_unavailable)?;
    let flow_out_degree = calls.iter().filter(|c| c.caller_key == root.key).count();

    tracing::debug!(
        flow_key,
        participant = %root.key,
        symbol = %symbol,
        ?selection,
        "root extracted"
    );

    Ok(RootExtraction {
        participant_key: root.key.clone(),
        symbol,
        symbol_source,
        selection,
        class_name: non_empty(root.class_name.as_deref()).map(String::from),
        file_path: root.file_path.clone(),
        flow_out_degree,
        warnings,
    })
}
