use crate::model::{CallEdge, ExecutionFlow, FlowCall, FlowParticipant, IndexedSymbol};
use blake3::Hasher;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDigest {
    pub rows: usize,
    pub hash: String,
}

/// Content digest of a store, independent of row ids and insertion order.
/// A snapshot and the database it was imported into digest identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentDigest {
    pub symbols: TableDigest,
    pub edges: TableDigest,
    pub flows: TableDigest,
}

impl ContentDigest {
    pub fn fingerprint(&self) -> String {
        let mut hasher = Hasher::new();
        for table in [&self.symbols, &self.edges, &self.flows] {
            hasher.update(table.hash.as_bytes());
            hasher.update(b"\x00");
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Rows are sorted before hashing.
pub fn digest_rows(mut rows: Vec<String>) -> TableDigest {
    rows.sort();
    let mut hasher = Hasher::new();
    for row in &rows {
        hasher.update(row.as_bytes());
        hasher.update(b"\n");
    }
    TableDigest {
        rows: rows.len(),
        hash: hasher.finalize().to_hex().to_string(),
    }
}

pub fn symbol_row(symbol: &IndexedSymbol) -> String {
    json!([
        symbol.function_name,
        symbol.file_path,
        symbol.class_name,
        symbol.language
    ])
    .to_string()
}

pub fn edge_row(edge: &CallEdge) -> String {
    json!([edge.caller, edge.callee, edge.confidence]).to_string()
}

pub fn flow_row(flow: &ExecutionFlow) -> String {
    json!(["flow", flow.key, flow.name]).to_string()
}

pub fn participant_row(flow_key: &str, participant: &FlowParticipant) -> String {
    json!([
        "participant",
        flow_key,
        participant.key,
        participant.kind.as_str(),
        participant.function_name,
        participant.name,
        participant.class_name,
        participant.file_path,
        participant.file_name,
        participant.starts_flow
    ])
    .to_string()
}

pub fn call_row(flow_key: &str, call: &FlowCall) -> String {
    json!(["call", flow_key, call.caller_key, call.callee_key]).to_string()
}
