use mutant_triage::snapshot::SnapshotBuilder;
use mutant_triage::triage::{MemoryArtifact, TriageConfig, VariantPhase};
use mutant_triage::*;

struct Counter {
    hits: u32,
    tags: Vec<String>,
}
observe_record!(Counter { hits, tags });

#[test]
fn root_exports_capture_and_diff() {
    let before = Counter {
        hits: 1,
        tags: vec!["a".to_string()],
    };
    let after = Counter {
        hits: 2,
        tags: vec!["a".to_string()],
    };
    let limits = CaptureLimits::default();
    let a = capture_call(limits, &CallObservation::new(Some(&before), &[], None));
    let b = capture_call(limits, &CallObservation::new(Some(&after), &[], None));

    let report: DiffReport = diff(&a, &b);
    assert_eq!(report.classification, Classification::Distinguishable);
    assert_eq!(report.differences[0].root, RootName::Receiver);
    assert_eq!(report.differences[0].path, "receiver.hits");
}

#[test]
fn snapshot_builder_and_triage_types_are_public() {
    let mut builder = SnapshotBuilder::new();
    let id = builder.scalar("bool", ScalarValue::Bool(true));
    builder.return_value(Root::node(id));
    let snapshot: Snapshot = builder.build();
    assert!(snapshot.validate().is_ok());

    let config = TriageConfig::for_project("/tmp/project");
    assert!(config.output_dir.starts_with("/tmp/project"));
    assert!(VariantPhase::Idle.can_advance_to(VariantPhase::OriginalInstalled));
    assert_eq!(MemoryArtifact::new("A", b"x".to_vec()).bytes(), b"x".to_vec());
}
