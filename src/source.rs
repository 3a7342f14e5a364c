//! Read interfaces for the two collaborators a validation consumes.
//!
//! Both are injected into the pipeline as trait objects so the SQLite store,
//! a loaded snapshot, or a test fixture can stand behind them. Implementations
//! must be safe to share between concurrent requests.

use crate::model::{
    CallEdge, ExecutionFlow, FlowCall, FlowParticipant, IndexOverview, IndexedSymbol,
};
use anyhow::Result;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Read access to the flat, file-scanned symbol index and its call edges.
pub trait StaticIndex: Send + Sync {
    /// Symbols whose function_name equals `name` exactly.
    fn symbols_named(&self, name: &str) -> Result<Vec<IndexedSymbol>>;

    /// Symbols whose function_name equals `name` ignoring ASCII case.
    fn symbols_named_nocase(&self, name: &str) -> Result<Vec<IndexedSymbol>>;

    /// Symbols whose function_name contains `fragment`, ignoring ASCII case.
    fn symbols_containing(&self, fragment: &str) -> Result<Vec<IndexedSymbol>>;

    /// Symbols declared in `class_name`, ignoring ASCII case.
    fn symbols_in_class(&self, class_name: &str) -> Result<Vec<IndexedSymbol>>;

    /// Distinct file paths of indexed symbols containing `fragment`, ignoring
    /// ASCII case, sorted.
    fn file_paths_containing(&self, fragment: &str) -> Result<Vec<String>>;

    /// Outgoing call edges of `caller`, matched ignoring ASCII case.
    fn outgoing_edges(&self, caller: &str) -> Result<Vec<CallEdge>>;

    /// Up to `limit` symbols, ordered by function_name then id.
    fn list_symbols(&self, limit: usize) -> Result<Vec<IndexedSymbol>>;

    fn overview(&self) -> Result<IndexOverview>;
}

/// Read access to the store of recorded execution flows.
pub trait FlowGraph: Send + Sync {
    fn flow(&self, flow_key: &str) -> Result<Option<ExecutionFlow>>;

    fn participants(&self, flow_key: &str) -> Result<Vec<FlowParticipant>>;

    fn calls(&self, flow_key: &str) -> Result<Vec<FlowCall>>;
}

/// The pair of collaborators a request reads from.
#[derive(Clone)]
pub struct Sources {
    pub index: Arc<dyn StaticIndex>,
    pub flows: Arc<dyn FlowGraph>,
}

impl Sources {
    pub fn new(index: Arc<dyn StaticIndex>, flows: Arc<dyn FlowGraph>) -> Self {
        Self { index, flows }
    }

    /// One store serving both interfaces.
    pub fn shared<S>(store: S) -> Self
    where
        S: StaticIndex + FlowGraph + 'static,
    {
        let store = Arc::new(store);
        Self {
            index: store.clone(),
            flows: store,
        }
    }
}

/// Normalized form used to compare identifiers across the two sources.
pub fn name_key(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

/// In-memory static index.
#[derive(Debug, Default, Clone)]
pub struct MemoryIndex {
    symbols: Vec<IndexedSymbol>,
    edges: Vec<CallEdge>,
    by_caller: HashMap<String, Vec<usize>>,
}

impl MemoryIndex {
    pub fn new(symbols: Vec<IndexedSymbol>, edges: Vec<CallEdge>) -> Self {
        let mut index = Self::default();
        for symbol in symbols {
            index.push_symbol(symbol);
        }
        for edge in edges {
            index.push_edge(edge);
        }
        index
    }

    pub fn push_symbol(&mut self, symbol: IndexedSymbol) {
        self.symbols.push(symbol);
    }

    pub fn push_edge(&mut self, edge: CallEdge) {
        self.by_caller
            .entry(name_key(&edge.caller))
            .or_default()
            .push(self.edges.len());
        self.edges.push(edge);
    }

    pub fn symbols(&self) -> &[IndexedSymbol] {
        &self.symbols
    }

    pub fn edges(&self) -> &[CallEdge] {
        &self.edges
    }

    fn filtered<F>(&self, predicate: F) -> Vec<IndexedSymbol>
    where
        F: Fn(&IndexedSymbol) -> bool,
    {
        let mut out: Vec<IndexedSymbol> =
            self.symbols.iter().filter(|s| predicate(s)).cloned().collect();
        out.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        out
    }
}

impl StaticIndex for MemoryIndex {
    fn symbols_named(&self, name: &str) -> Result<Vec<IndexedSymbol>> {
        Ok(self.filtered(|s| s.function_name == name))
    }

    fn symbols_named_nocase(&self, name: &str) -> Result<Vec<IndexedSymbol>> {
        Ok(self.filtered(|s| s.function_name.eq_ignore_ascii_case(name)))
    }

    fn symbols_containing(&self, fragment: &str) -> Result<Vec<IndexedSymbol>> {
        let needle = fragment.to_ascii_lowercase();
        Ok(self.filtered(|s| s.function_name.to_ascii_lowercase().contains(&needle)))
    }

    fn symbols_in_class(&self, class_name: &str) -> Result<Vec<IndexedSymbol>> {
        Ok(self.filtered(|s| {
            s.class_name
                .as_deref()
                .is_some_and(|c| c.trim().eq_ignore_ascii_case(class_name.trim()))
        }))
    }

    fn file_paths_containing(&self, fragment: &str) -> Result<Vec<String>> {
        let needle = fragment.to_ascii_lowercase();
        let paths: BTreeSet<String> = self
            .symbols
            .iter()
            .filter(|s| s.file_path.to_ascii_lowercase().contains(&needle))
            .map(|s| s.file_path.clone())
            .collect();
        Ok(paths.into_iter().collect())
    }

    fn outgoing_edges(&self, caller: &str) -> Result<Vec<CallEdge>> {
        let Some(positions) = self.by_caller.get(&name_key(caller)) else {
            return Ok(Vec::new());
        };
        Ok(positions.iter().map(|&idx| self.edges[idx].clone()).collect())
    }

    fn list_symbols(&self, limit: usize) -> Result<Vec<IndexedSymbol>> {
        let mut out = self.symbols.clone();
        out.sort_by(|a, b| a.function_name.cmp(&b.function_name).then(a.id.cmp(&b.id)));
        out.truncate(limit);
        Ok(out)
    }

    fn overview(&self) -> Result<IndexOverview> {
        let languages: BTreeSet<String> =
            self.symbols.iter().map(|s| s.language.clone()).collect();
        Ok(IndexOverview {
            symbols: self.symbols.len() as i64,
            edges: self.edges.len() as i64,
            flows: 0,
            languages: languages.into_iter().collect(),
            fingerprint: None,
        })
    }
}

#[derive(Debug, Clone)]
struct StoredFlow {
    flow: ExecutionFlow,
    participants: Vec<FlowParticipant>,
    calls: Vec<FlowCall>,
}

/// In-memory flow graph.
#[derive(Debug, Default, Clone)]
pub struct MemoryFlowGraph {
    flows: HashMap<String, StoredFlow>,
}

impl MemoryFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_flow(
        &mut self,
        flow: ExecutionFlow,
        participants: Vec<FlowParticipant>,
        calls: Vec<FlowCall>,
    ) {
        self.flows.insert(
            flow.key.clone(),
            StoredFlow {
                flow,
                participants,
                calls,
            },
        );
    }

    pub fn flow_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.flows.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

impl FlowGraph for MemoryFlowGraph {
    fn flow(&self, flow_key: &str) -> Result<Option<ExecutionFlow>> {
        Ok(self.flows.get(flow_key).map(|stored| stored.flow.clone()))
    }

    fn participants(&self, flow_key: &str) -> Result<Vec<FlowParticipant>> {
        Ok(self
            .flows
            .get(flow_key)
            .map(|stored| stored.participants.clone())
            .unwrap_or_default())
    }

    fn calls(&self, flow_key: &str) -> Result<Vec<FlowCall>> {
        Ok(self
            .flows
            .get(flow_key)
            .map(|stored| stored.calls.clone())
            .unwrap_or_default())
    }
}
