use serde::{Deserialize, Serialize};

/// A function or method found by the external indexer.
///
/// `function_name` is not unique: overloads and name reuse across files and
/// classes are normal. `id` is the only unique key.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IndexedSymbol {
    pub id: i64,
    pub function_name: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub language: String,
}

impl IndexedSymbol {
    /// Ordering used for every list of matches handed out by the resolver.
    pub fn sort_key(&self) -> (&str, &str, &str, i64) {
        (
            self.function_name.as_str(),
            self.file_path.as_str(),
            self.class_name.as_deref().unwrap_or(""),
            self.id,
        )
    }
}

/// A caller -> callee fact keyed by function name, not by symbol id.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CallEdge {
    pub caller: String,
    pub callee: String,
    pub confidence: f64,
}

/// Role of a participant. Flow stores spell the root marker inconsistently,
/// so anything other than `ROOT` (any case) is ordinary.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(from = "String", into = "&'static str")]
pub enum ParticipantType {
    Root,
    #[default]
    Ordinary,
}

impl From<String> for ParticipantType {
    fn from(raw: String) -> Self {
        ParticipantType::parse(&raw)
    }
}

impl From<ParticipantType> for &'static str {
    fn from(kind: ParticipantType) -> Self {
        kind.as_str()
    }
}

impl ParticipantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantType::Root => "ROOT",
            ParticipantType::Ordinary => "ordinary",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("root") {
            ParticipantType::Root
        } else {
            ParticipantType::Ordinary
        }
    }
}

/// One snippet's participation in a flow.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FlowParticipant {
    pub key: String,
    #[serde(rename = "type", default)]
    pub kind: ParticipantType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub starts_flow: bool,
}

/// A CALLS edge between two participants of the same flow.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FlowCall {
    pub caller_key: String,
    pub callee_key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ExecutionFlow {
    pub key: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct IndexOverview {
    pub symbols: i64,
    pub edges: i64,
    pub flows: i64,
    pub languages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_type_parses_case_insensitively() {
        assert_eq!(ParticipantType::parse("ROOT"), ParticipantType::Root);
        assert_eq!(ParticipantType::parse(" root "), ParticipantType::Root);
        assert_eq!(ParticipantType::parse("FUNCTION"), ParticipantType::Ordinary);
        assert_eq!(ParticipantType::parse(""), ParticipantType::Ordinary);
    }

    #[test]
    fn participant_deserializes_unknown_type_as_ordinary() {
        let raw = r#"{"key":"s1","type":"METHOD","function_name":"Run","starts_flow":true}"#;
        let participant: FlowParticipant = serde_json::from_str(raw).unwrap();
        assert_eq!(participant.kind, ParticipantType::Ordinary);
        assert!(participant.starts_flow);

        let raw = r#"{"key":"s2","type":"ROOT"}"#;
        let participant: FlowParticipant = serde_json::from_str(raw).unwrap();
        assert_eq!(participant.kind, ParticipantType::Root);
        assert!(!participant.starts_flow);
    }
}
