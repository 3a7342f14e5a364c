//! Snapshot files: both sources serialized as one JSON or YAML document.
//!
//! ```yaml
//! symbols:
//!   - { function_name: TForm1, file_path: Unit1.pas, class_name: TForm1, language: delphi }
//! edges:
//!   - { caller: TForm1, callee: Button2Click, confidence: 0.9 }
//! flows:
//!   - key: EF-1
//!     name: Save from form
//!     participants:
//!       - { key: p1, type: ROOT, name: Form1, starts_flow: true }
//!     calls: []
//! ```

use crate::digest::{
    ContentDigest, call_row, digest_rows, edge_row, flow_row, participant_row, symbol_row,
};
use crate::model::{CallEdge, ExecutionFlow, FlowCall, FlowParticipant, IndexedSymbol};
use crate::source::{MemoryFlowGraph, MemoryIndex};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Confidence given to edges recorded without one.
pub const DEFAULT_EDGE_CONFIDENCE: f64 = 0.8;

fn default_confidence() -> f64 {
    DEFAULT_EDGE_CONFIDENCE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSymbol {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub function_name: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEdge {
    pub caller: String,
    pub callee: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFlow {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub participants: Vec<FlowParticipant>,
    #[serde(default)]
    pub calls: Vec<FlowCall>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub symbols: Vec<SnapshotSymbol>,
    #[serde(default)]
    pub edges: Vec<SnapshotEdge>,
    #[serde(default)]
    pub flows: Vec<SnapshotFlow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Yaml,
}

impl SnapshotFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                SnapshotFormat::Yaml
            }
            _ => SnapshotFormat::Json,
        }
    }
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read snapshot {}", path.display()))?;
        Self::parse(&raw, SnapshotFormat::from_path(path))
            .with_context(|| format!("parse snapshot {}", path.display()))
    }

    pub fn parse(raw: &str, format: SnapshotFormat) -> Result<Self> {
        let snapshot: Snapshot = match format {
            SnapshotFormat::Json => serde_json::from_str(raw)?,
            SnapshotFormat::Yaml => serde_yaml_ng::from_str(raw)?,
        };
        snapshot.check()?;
        Ok(snapshot)
    }

    fn check(&self) -> Result<()> {
        for (idx, symbol) in self.symbols.iter().enumerate() {
            if symbol.function_name.trim().is_empty() {
                bail!("symbols[{idx}]: function_name must not be empty");
            }
        }
        for (idx, edge) in self.edges.iter().enumerate() {
            if !(0.0..=1.0).contains(&edge.confidence) {
                bail!(
                    "edges[{idx}]: confidence {} outside [0, 1]",
                    edge.confidence
                );
            }
        }
        let mut keys: Vec<&str> = self.flows.iter().map(|f| f.key.as_str()).collect();
        keys.sort_unstable();
        if let Some(pair) = keys.windows(2).find(|pair| pair[0] == pair[1]) {
            bail!("flow key {} appears more than once", pair[0]);
        }
        Ok(())
    }

    /// Symbols with ids filled in: given ids are kept, missing ones follow
    /// the largest given id in document order.
    pub fn indexed_symbols(&self) -> Vec<IndexedSymbol> {
        let mut next_id = self
            .symbols
            .iter()
            .filter_map(|s| s.id)
            .max()
            .unwrap_or(0)
            + 1;
        self.symbols
            .iter()
            .map(|s| {
                let id = s.id.unwrap_or_else(|| {
                    let id = next_id;
                    next_id += 1;
                    id
                });
                IndexedSymbol {
                    id,
                    function_name: s.function_name.trim().to_string(),
                    file_path: s.file_path.clone(),
                    class_name: s
                        .class_name
                        .as_deref()
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(String::from),
                    language: s.language.clone(),
                }
            })
            .collect()
    }

    pub fn call_edges(&self) -> Vec<CallEdge> {
        self.edges
            .iter()
            .map(|e| CallEdge {
                caller: e.caller.trim().to_string(),
                callee: e.callee.trim().to_string(),
                confidence: e.confidence,
            })
            .collect()
    }

    pub fn into_memory(self) -> (MemoryIndex, MemoryFlowGraph) {
        let index = MemoryIndex::new(self.indexed_symbols(), self.call_edges());
        let mut graph = MemoryFlowGraph::new();
        for flow in self.flows {
            graph.insert_flow(
                ExecutionFlow {
                    key: flow.key,
                    name: flow.name,
                },
                flow.participants,
                flow.calls,
            );
        }
        (index, graph)
    }

    pub fn digest(&self) -> ContentDigest {
        let mut flow_rows = Vec::new();
        for flow in &self.flows {
            flow_rows.push(flow_row(&ExecutionFlow {
                key: flow.key.clone(),
                name: flow.name.clone(),
            }));
            for participant in &flow.participants {
                flow_rows.push(participant_row(&flow.key, participant));
            }
            for call in &flow.calls {
                flow_rows.push(call_row(&flow.key, call));
            }
        }
        ContentDigest {
            symbols: digest_rows(self.indexed_symbols().iter().map(symbol_row).collect()),
            edges: digest_rows(self.call_edges().iter().map(edge_row).collect()),
            flows: digest_rows(flow_rows),
        }
    }

    pub fn fingerprint(&self) -> String {
        self.digest().fingerprint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParticipantType;
    use crate::source::{FlowGraph, StaticIndex};

    const YAML: &str = r#"
symbols:
  - { function_name: TForm1, file_path: Unit1.pas, class_name: TForm1, language: delphi }
  - { id: 7, function_name: Button2Click, file_path: Unit1.pas, class_name: TForm1, language: delphi }
edges:
  - { caller: TForm1, callee: Button2Click }
flows:
  - key: EF-1
    name: Save from form
    participants:
      - { key: p1, type: root, name: Form1, starts_flow: true }
      - { key: p2, function_name: Button2Click }
    calls:
      - { caller_key: p1, callee_key: p2 }
"#;

    #[test]
    fn yaml_snapshot_loads_with_defaults() {
        let snapshot = Snapshot::parse(YAML, SnapshotFormat::Yaml).unwrap();
        let symbols = snapshot.indexed_symbols();
        assert_eq!(symbols[0].id, 8);
        assert_eq!(symbols[1].id, 7);
        assert_eq!(snapshot.edges[0].confidence, DEFAULT_EDGE_CONFIDENCE);

        let (index, graph) = snapshot.into_memory();
        assert_eq!(index.symbols_named("TForm1").unwrap().len(), 1);
        let participants = graph.participants("EF-1").unwrap();
        assert_eq!(participants[0].kind, ParticipantType::Root);
        assert_eq!(participants[1].kind, ParticipantType::Ordinary);
        assert!(!participants[1].starts_flow);
    }

    #[test]
    fn json_and_yaml_forms_fingerprint_the_same() {
        let from_yaml = Snapshot::parse(YAML, SnapshotFormat::Yaml).unwrap();
        let json = serde_json::to_string(&from_yaml).unwrap();
        let from_json = Snapshot::parse(&json, SnapshotFormat::Json).unwrap();
        assert_eq!(from_yaml.fingerprint(), from_json.fingerprint());
    }

    #[test]
    fn invalid_snapshots_are_rejected() {
        let err = Snapshot::parse(
            r#"{"edges":[{"caller":"a","callee":"b","confidence":1.5}]}"#,
            SnapshotFormat::Json,
        )
        .unwrap_err();
        assert!(err.to_string().contains("outside [0, 1]"));

        let err = Snapshot::parse(
            r#"{"flows":[{"key":"EF-1"},{"key":"EF-1"}]}"#,
            SnapshotFormat::Json,
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            SnapshotFormat::from_path(Path::new("a/b.YML")),
            SnapshotFormat::Yaml
        );
        assert_eq!(
            SnapshotFormat::from_path(Path::new("a/b.json")),
            SnapshotFormat::Json
        );
    }
}
