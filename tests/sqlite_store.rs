use anyhow::{Result, bail};
use flowtrust::db::{Db, ImportMode};
use flowtrust::model::{
    CallEdge, ExecutionFlow, FlowParticipant, IndexOverview, IndexedSymbol, ParticipantType,
};
use flowtrust::snapshot::Snapshot;
use flowtrust::{FlowGraph, SourceKind, StaticIndex, ValidateError, ValidateOptions, validate};
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn imported_db() -> (tempfile::TempDir, Db, Snapshot) {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::new(&dir.path().join(".flowtrust").join("flowtrust.sqlite")).unwrap();
    let snapshot = Snapshot::load(&fixture_path("delphi_forms.json")).unwrap();
    db.import_snapshot(&snapshot, ImportMode::Replace).unwrap();
    (dir, db, snapshot)
}

#[test]
fn import_preserves_content_fingerprint() {
    let (_dir, db, snapshot) = imported_db();
    let overview = db.overview().unwrap();
    assert_eq!(overview.symbols, 12);
    assert_eq!(overview.edges, 12);
    assert_eq!(overview.flows, 7);
    assert_eq!(overview.languages, vec!["delphi", "python"]);
    assert_eq!(overview.fingerprint, Some(snapshot.fingerprint()));
    assert_eq!(db.digest().unwrap(), snapshot.digest());
}

#[test]
fn reimport_replaces_rather_than_duplicates() {
    let (_dir, db, snapshot) = imported_db();
    let stats = db.import_snapshot(&snapshot, ImportMode::Replace).unwrap();
    assert_eq!(stats.symbols, 12);
    assert_eq!(db.overview().unwrap().symbols, 12);
    assert_eq!(db.symbols_named("Execute").unwrap().len(), 2);
}

#[test]
fn append_adds_symbols_and_replaces_flows_by_key() {
    let (_dir, db, _snapshot) = imported_db();
    let extra = Snapshot::parse(
        r#"{
            "symbols": [{"function_name": "Execute", "file_path": "src/Batch.pas", "class_name": "TBatch", "language": "delphi"}],
            "flows": [{"key": "EF-GHOST", "name": "renamed", "participants": [
                {"key": "g2", "type": "ROOT", "function_name": "Execute", "starts_flow": true}
            ]}]
        }"#,
        flowtrust::snapshot::SnapshotFormat::Json,
    )
    .unwrap();
    db.import_snapshot(&extra, ImportMode::Append).unwrap();
    assert_eq!(db.symbols_named("Execute").unwrap().len(), 3);
    assert_eq!(db.flow("EF-GHOST").unwrap().unwrap().name, "renamed");
    let participants = db.participants("EF-GHOST").unwrap();
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].key, "g2");
    assert_eq!(db.flow_keys().unwrap().len(), 7);
}

#[test]
fn lookups_follow_index_semantics() {
    let (_dir, db, _snapshot) = imported_db();
    assert!(db.symbols_named("tform1").unwrap().is_empty());
    assert_eq!(db.symbols_named_nocase("tform1").unwrap().len(), 1);
    let containing: Vec<String> = db
        .symbols_containing("CLICK")
        .unwrap()
        .into_iter()
        .map(|s| s.function_name)
        .collect();
    assert_eq!(containing, vec!["Button1Click", "Button2Click"]);
    assert_eq!(db.symbols_in_class("tform1").unwrap().len(), 3);
    assert!(db.symbols_containing("%").unwrap().is_empty());
    assert_eq!(db.outgoing_edges("tform1").unwrap().len(), 2);
    assert_eq!(db.list_symbols(2).unwrap().len(), 2);
}

#[test]
fn participants_round_trip() {
    let (_dir, db, _snapshot) = imported_db();
    let participants = db.participants("EF-FORM1").unwrap();
    assert_eq!(participants.len(), 3);
    assert_eq!(participants[0].kind, ParticipantType::Root);
    assert!(participants[0].starts_flow);
    assert_eq!(participants[0].name.as_deref(), Some("Form1"));
    assert_eq!(participants[0].file_name, "Unit1.pas");
    assert_eq!(db.calls("EF-FORM1").unwrap().len(), 3);
    assert!(db.flow("EF-MISSING").unwrap().is_none());
}

#[test]
fn store_and_memory_give_identical_reports() {
    let (_dir, db, snapshot) = imported_db();
    let (index, flows) = snapshot.into_memory();
    let options = ValidateOptions::default();
    for (flow_key, target) in [
        ("EF-FORM1", "SaveRecord"),
        ("EF-EXECUTE", "SaveRecord"),
        ("EF-MAINFORM", "OpenDatabase"),
        ("EF-GHOST", "SaveRecord"),
    ] {
        let from_db = validate(&db, &db, flow_key, target, &options)
            .unwrap()
            .to_json()
            .unwrap();
        let from_memory = validate(&index, &flows, flow_key, target, &options)
            .unwrap()
            .to_json()
            .unwrap();
        assert_eq!(from_db, from_memory, "{flow_key} -> {target}");
    }
}

#[test]
fn insert_flow_is_visible_to_readers() {
    let (_dir, db, _snapshot) = imported_db();
    db.insert_flow(
        &ExecutionFlow {
            key: "EF-NEW".to_string(),
            name: "added".to_string(),
        },
        &[FlowParticipant {
            key: "n1".to_string(),
            kind: ParticipantType::Root,
            function_name: Some("A".to_string()),
            name: None,
            class_name: None,
            file_path: "src/abc.py".to_string(),
            file_name: "abc.py".to_string(),
            starts_flow: true,
        }],
        &[],
    )
    .unwrap();
    let report = validate(&db, &db, "EF-NEW", "C", &ValidateOptions::default()).unwrap();
    assert!(report.verdict.reachable);
}

struct BrokenIndex;

impl StaticIndex for BrokenIndex {
    fn symbols_named(&self, _name: &str) -> Result<Vec<IndexedSymbol>> {
        bail!("index offline")
    }
    fn symbols_named_nocase(&self, _name: &str) -> Result<Vec<IndexedSymbol>> {
        bail!("index offline")
    }
    fn symbols_containing(&self, _fragment: &str) -> Result<Vec<IndexedSymbol>> {
        bail!("index offline")
    }
    fn symbols_in_class(&self, _class_name: &str) -> Result<Vec<IndexedSymbol>> {
        bail!("index offline")
    }
    fn file_paths_containing(&self, _fragment: &str) -> Result<Vec<String>> {
        bail!("index offline")
    }
    fn outgoing_edges(&self, _caller: &str) -> Result<Vec<CallEdge>> {
        bail!("index offline")
    }
    fn list_symbols(&self, _limit: usize) -> Result<Vec<IndexedSymbol>> {
        bail!("index offline")
    }
    fn overview(&self) -> Result<IndexOverview> {
        bail!("index offline")
    }
}

#[test]
fn index_failure_is_attributed_to_the_static_index() {
    let (_dir, db, _snapshot) = imported_db();
    let err = validate(
        &BrokenIndex,
        &db,
        "EF-FORM1",
        "SaveRecord",
        &ValidateOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ValidateError::SourceUnavailable { .. }));
    assert_eq!(err.source_kind(), Some(SourceKind::StaticIndex));
    assert!(err.to_string().contains("index offline"));
}
