use ifdwalk::metadata::composite::{resolve, CompositeDescriptor, CompositeInputs, CompositeTable};
use ifdwalk::metadata::types::models::Provenance;
use ifdwalk::{EntryValue, ExtractedEntry, QualifiedIdentity, Severity, TagStore, Value, WarningKind};

fn entry(group: &str, name: &str, value: u64, priority: i32) -> ExtractedEntry {
    ExtractedEntry {
        identity: QualifiedIdentity::new(group, name),
        value: EntryValue::Decoded(Value::Unsigned(vec![value])),
        provenance: Provenance::Derived { sources: Vec::new() },
        priority,
    }
}

fn store(values: &[(&str, u64)]) -> TagStore {
    values.iter().map(|&(name, value)| entry("Main", name, value, 0)).collect()
}

fn sum(inputs: &CompositeInputs<'_>) -> Option<Value> {
    let a = inputs.required(0)?.as_u64()?;
    let b = inputs.required(1)?.as_u64()?;
    Some(Value::Unsigned(vec![a + b]))
}

fn double(inputs: &CompositeInputs<'_>) -> Option<Value> {
    Some(Value::Unsigned(vec![inputs.required(0)?.as_u64()? * 2]))
}

fn first_or_zero(inputs: &CompositeInputs<'_>) -> Option<Value> {
    let base = inputs.required(0).and_then(Value::as_u64).unwrap_or(0);
    let extra = inputs.desired(0).and_then(Value::as_u64).unwrap_or(0);
    Some(Value::Unsigned(vec![base + extra]))
}

fn never(_: &CompositeInputs<'_>) -> Option<Value> {
    None
}

fn unsigned(value: u64) -> Value {
    Value::Unsigned(vec![value])
}

#[test]
fn chained_composites_reach_a_fixed_point() {
    let table = CompositeTable::new()
        .with(CompositeDescriptor::new("D", double).require("C"))
        .with(CompositeDescriptor::new("C", sum).require("A").require("B"));
    let resolution = resolve(&store(&[("A", 10), ("B", 20)]), &table);

    assert_eq!(resolution.get("C"), Some(&unsigned(30)));
    assert_eq!(resolution.get("D"), Some(&unsigned(60)));
    let built: Vec<Vec<&str>> = resolution.passes.iter().map(|p| p.built.clone()).collect();
    assert_eq!(built, [vec!["C"], vec!["D"], vec![]]);
    assert!(!resolution.passes[2].made_progress());
    assert!(resolution.warnings.is_empty());

    match &resolution.entries[1].provenance {
        Provenance::Derived { sources } => assert_eq!(sources, &[QualifiedIdentity::new("Composite", "C")]),
        other => panic!("unexpected provenance {:?}", other),
    }
}

#[test]
fn present_inhibitor_drops_the_composite() {
    let table = CompositeTable::new().with(CompositeDescriptor::new("E", double).require("A").inhibit("B"));

    let resolution = resolve(&store(&[("A", 1), ("B", 2)]), &table);
    assert_eq!(resolution.get("E"), None);
    assert_eq!(resolution.passes[0].deferred, 0);
    assert!(resolution.warnings.is_empty());

    let resolution = resolve(&store(&[("A", 1)]), &table);
    assert_eq!(resolution.get("E"), Some(&unsigned(2)));
}

#[test]
fn pending_inhibitor_defers() {
    let table = CompositeTable::new()
        .with(CompositeDescriptor::new("E", double).require("A").inhibit("F"))
        .with(CompositeDescriptor::new("F", double).require("A"));
    let resolution = resolve(&store(&[("A", 1)]), &table);

    assert_eq!(resolution.get("F"), Some(&unsigned(2)));
    assert_eq!(resolution.get("E"), None);
    assert_eq!(resolution.passes[0].built, ["F"]);
    assert_eq!(resolution.passes[1].deferred, 0);
}

#[test]
fn resolution_is_idempotent() {
    let table = CompositeTable::new()
        .with(CompositeDescriptor::new("C", sum).require("A").require("B"))
        .with(CompositeDescriptor::new("D", double).require("C"));
    let base = store(&[("A", 10), ("B", 20)]);
    let first = resolve(&base, &table);
    assert_eq!(resolve(&base, &table).entries, first.entries);

    let mut extended = base.clone();
    extended.extend(first.entries.iter().cloned());
    let second = resolve(&extended, &table);

    let values = |entries: &[ExtractedEntry]| -> Vec<(String, EntryValue)> {
        let mut values: Vec<_> = entries
            .iter()
            .map(|e| (e.identity.to_string(), e.value.clone()))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        values
    };
    assert_eq!(values(&first.entries), values(&second.entries));
}

#[test]
fn cycles_are_reported_and_dropped() {
    let table = CompositeTable::new()
        .with(CompositeDescriptor::new("X", double).require("Y"))
        .with(CompositeDescriptor::new("Y", double).require("X"));
    let resolution = resolve(&TagStore::new(), &table);

    assert!(resolution.entries.is_empty());
    assert_eq!(resolution.passes.len(), 1);
    assert_eq!(resolution.warnings.len(), 2);
    assert!(resolution
        .warnings
        .iter()
        .all(|w| w.kind == WarningKind::UnresolvableComposite && w.severity == Severity::Warning));
}

#[test]
fn missing_required_input_is_minor() {
    let table = CompositeTable::new().with(CompositeDescriptor::new("C", sum).require("A").require("Nope"));
    let resolution = resolve(&store(&[("A", 10)]), &table);

    assert!(resolution.entries.is_empty());
    assert_eq!(resolution.warnings.len(), 1);
    assert_eq!(resolution.warnings[0].severity, Severity::Minor);
    assert!(resolution.warnings[0].message.contains("Nope"));
}

#[test]
fn inapplicable_composite_is_dropped_quietly() {
    let table = CompositeTable::new().with(CompositeDescriptor::new("N", never).require("A"));
    let resolution = resolve(&store(&[("A", 10)]), &table);
    assert!(resolution.entries.is_empty());
    assert!(resolution.warnings.is_empty());
}

#[test]
fn pending_desired_input_is_relaxed_when_stuck() {
    // P would like Q, but Q needs P: P is built without Q first.
    let table = CompositeTable::new()
        .with(CompositeDescriptor::new("P", first_or_zero).require("A").desire("Q"))
        .with(CompositeDescriptor::new("Q", double).require("P"));
    let resolution = resolve(&store(&[("A", 5)]), &table);

    assert_eq!(resolution.get("P"), Some(&unsigned(5)));
    assert_eq!(resolution.get("Q"), Some(&unsigned(10)));
    assert!(!resolution.passes[0].made_progress());
    assert!(resolution.passes[1].relaxed);
    assert_eq!(resolution.passes[1].built, ["P"]);
    assert_eq!(resolution.passes[2].built, ["Q"]);
}

#[test]
fn desired_input_waits_for_pending_composite() {
    let table = CompositeTable::new()
        .with(CompositeDescriptor::new("P", first_or_zero).require("A").desire("Q"))
        .with(CompositeDescriptor::new("Q", double).require("A"));
    let resolution = resolve(&store(&[("A", 5)]), &table);

    assert_eq!(resolution.get("Q"), Some(&unsigned(10)));
    assert_eq!(resolution.get("P"), Some(&unsigned(15)));
    assert!(resolution.passes.iter().all(|p| !p.relaxed));
}

#[test]
fn group_qualified_references_pick_one_group() {
    let mut tags = TagStore::new();
    tags.insert(entry("IFD0", "Width", 100, 0));
    tags.insert(entry("Maker", "Width", 200, 5));

    let table = CompositeTable::new()
        .with(CompositeDescriptor::new("Bare", double).require("Width"))
        .with(CompositeDescriptor::new("Qualified", double).require("IFD0:Width"));
    let resolution = resolve(&tags, &table);

    assert_eq!(resolution.get("Bare"), Some(&unsigned(400)));
    assert_eq!(resolution.get("Qualified"), Some(&unsigned(200)));
}
