use flowtrust::resolve::MatchMethod;
use flowtrust::root::RootSelection;
use flowtrust::snapshot::Snapshot;
use flowtrust::verify::{EdgeClass, PHANTOM_TRUST};
use flowtrust::{MemoryFlowGraph, MemoryIndex, ValidateOptions, Warning, validate};
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn load_fixture() -> (MemoryIndex, MemoryFlowGraph) {
    Snapshot::load(&fixture_path("delphi_forms.json"))
        .unwrap()
        .into_memory()
}

#[test]
fn form_flow_resolves_through_prefix_and_reaches_save() {
    let (index, flows) = load_fixture();
    let report = validate(
        &index,
        &flows,
        "EF-FORM1",
        "SaveRecord",
        &ValidateOptions::default(),
    )
    .unwrap();

    assert_eq!(report.root.symbol, "Form1");
    assert_eq!(report.root.flow_out_degree, 2);
    assert_eq!(report.resolution.method, MatchMethod::ClassPrefixFallback);
    assert_eq!(report.resolution.matches.len(), 1);
    assert_eq!(report.resolution.matches[0].function_name, "TForm1");

    let verdict = &report.verdict;
    assert!(verdict.reachable);
    assert!(!verdict.unresolved);
    assert_eq!(
        verdict.path,
        vec!["TForm1", "Button2Click", "TraitementDeLaBase", "SaveRecord"]
    );
    assert_eq!(verdict.confidence, 0.6);
    assert_eq!(verdict.hops, 3);
    assert!(verdict.weak_edges.is_empty());
    assert!(report.trusted());
}

#[test]
fn declared_calls_are_checked_against_the_index() {
    let (index, flows) = load_fixture();
    let report = validate(
        &index,
        &flows,
        "EF-FORM1",
        "SaveRecord",
        &ValidateOptions::default(),
    )
    .unwrap();

    let verification = &report.verification;
    assert_eq!(verification.confirmed, 2);
    assert_eq!(verification.phantom, 1);
    assert_eq!(verification.missing, 0);

    let first = &verification.edges[0];
    assert_eq!((first.caller_key.as_str(), first.callee_key.as_str()), ("s1", "s2"));
    assert_eq!(first.class, EdgeClass::Confirmed);
    assert_eq!(first.trust, 0.9);

    let phantom = &verification.edges[1];
    assert_eq!((phantom.caller_key.as_str(), phantom.callee_key.as_str()), ("s1", "s3"));
    assert_eq!(phantom.class, EdgeClass::Phantom);
    assert_eq!(phantom.trust, PHANTOM_TRUST);

    // Button2Click -> SaveRecord only has 0.05 evidence
    assert_eq!(verification.flow_trust, 0.05);
    assert!(report.warnings.contains(&Warning::PhantomCalls { count: 1 }));
}

#[test]
fn weakest_link_decides_path_confidence() {
    let (index, flows) = load_fixture();
    let report = validate(&index, &flows, "EF-ABC", "C", &ValidateOptions::default()).unwrap();
    assert_eq!(report.verdict.path, vec!["A", "B", "C"]);
    assert_eq!(report.verdict.confidence, 0.4);
}

#[test]
fn cycle_does_not_loop_when_target_is_missing() {
    let (index, flows) = load_fixture();
    let report = validate(&index, &flows, "EF-ABC", "Z", &ValidateOptions::default()).unwrap();
    assert!(!report.verdict.reachable);
    assert!(report.verdict.path.is_empty());
    assert_eq!(report.verdict.confidence, 0.0);
    assert!(!report.verdict.truncated);
}

#[test]
fn two_declared_roots_pick_deterministically() {
    let (index, flows) = load_fixture();
    let report = validate(
        &index,
        &flows,
        "EF-TWO-ROOTS",
        "OpenDatabase",
        &ValidateOptions::default(),
    )
    .unwrap();
    assert_eq!(report.root.participant_key, "r-alpha");
    assert_eq!(report.root.selection, RootSelection::RootStartsFlow);
    assert!(report.warnings.contains(&Warning::AmbiguousRoot {
        chosen: "r-alpha".to_string(),
        candidates: vec!["r-alpha".to_string(), "r-zeta".to_string()],
    }));
    assert_eq!(report.verdict.path, vec!["FormCreate", "OpenDatabase"]);
}

#[test]
fn flow_without_start_marker_fails_with_no_root() {
    let (index, flows) = load_fixture();
    let err = validate(&index, &flows, "EF-NO-ROOT", "B", &ValidateOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), "no_root_found");
}

#[test]
fn ambiguous_resolution_is_a_warning() {
    let (index, flows) = load_fixture();
    let report = validate(
        &index,
        &flows,
        "EF-EXECUTE",
        "SaveRecord",
        &ValidateOptions::default(),
    )
    .unwrap();
    assert!(report.resolution.ambiguous);
    assert!(report.warnings.contains(&Warning::AmbiguousResolution {
        symbol: "Execute".to_string(),
        count: 2,
    }));
    assert!(report.verdict.reachable);
    assert_eq!(report.verdict.confidence, 0.4);
}

#[test]
fn form_without_own_method_fans_out_to_handlers() {
    let (index, flows) = load_fixture();
    let report = validate(
        &index,
        &flows,
        "EF-MAINFORM",
        "OpenDatabase",
        &ValidateOptions::default(),
    )
    .unwrap();
    assert_eq!(report.resolution.method, MatchMethod::ClassMembers);
    assert_eq!(report.verdict.root.as_deref(), Some("Button1Click"));
    assert_eq!(report.verdict.confidence, 0.5);
}

#[test]
fn unknown_root_symbol_is_unresolved_not_failed() {
    let (index, flows) = load_fixture();
    let report = validate(
        &index,
        &flows,
        "EF-GHOST",
        "SaveRecord",
        &ValidateOptions::default(),
    )
    .unwrap();
    assert_eq!(report.resolution.method, MatchMethod::None);
    assert!(report.verdict.unresolved);
    assert!(!report.verdict.reachable);
}

#[test]
fn hop_budget_marks_verdict_truncated() {
    let (index, flows) = load_fixture();
    let options = ValidateOptions {
        max_hops: 2,
        min_confidence: 0.1,
        ..ValidateOptions::default()
    };
    let report = validate(&index, &flows, "EF-FORM1", "SaveRecord", &options).unwrap();
    assert!(!report.verdict.reachable);
    assert!(report.verdict.truncated);
    assert!(
        report
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::Truncated { .. }))
    );
}

#[test]
fn same_request_serializes_byte_identically() {
    let (index, flows) = load_fixture();
    let options = ValidateOptions::default();
    let runs: Vec<String> = (0..3)
        .map(|_| {
            validate(&index, &flows, "EF-FORM1", "SaveRecord", &options)
                .unwrap()
                .to_json()
                .unwrap()
        })
        .collect();
    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[1], runs[2]);
}
