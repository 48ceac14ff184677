//! Derived (composite) tags.
//!
//! Composites are computed from already-extracted tags after the walk. A
//! composite may depend on other composites, so resolution runs in passes
//! over a worklist until a pass makes no progress:
//!
//! - every pending composite is evaluated against the state at the start of
//!   the pass; new values become visible from the next pass on
//! - a missing required input that is itself a pending composite defers; any
//!   other missing required input drops the composite
//! - a present inhibitor drops the composite; a pending inhibitor defers it
//! - desired inputs are optional, but a pending desired composite defers once;
//!   when nothing else can progress a relaxed pass treats it as absent
//!
//! Whatever is still pending when no progress is possible depends on itself
//! through some chain and is reported as unresolvable.

use std::fmt;

use log::{debug, info, trace};

use super::store::TagStore;
use super::types::error::MetaError;
use super::types::models::{
    DirectoryPath, EntryValue, ExtractedEntry, Provenance, QualifiedIdentity, Severity, Warning,
};
use super::types::value::Value;

/// Default group of derived tags.
pub const COMPOSITE_GROUP: &str = "Composite";

/// A reference to an input tag: `"Name"` or `"Group:Name"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityRef {
    pub group: Option<String>,
    pub name: String,
}

impl IdentityRef {
    pub fn parse(reference: &str) -> Self {
        match reference.rsplit_once(':') {
            Some((group, name)) if !group.is_empty() => Self {
                group: Some(group.to_string()),
                name: name.to_string(),
            },
            _ => Self {
                group: None,
                name: reference.trim_start_matches(':').to_string(),
            },
        }
    }

    fn matches(&self, identity: &QualifiedIdentity) -> bool {
        self.name == identity.name && self.group.as_ref().map_or(true, |g| *g == identity.group)
    }

    fn lookup<'s>(&self, store: &'s TagStore) -> Option<&'s ExtractedEntry> {
        store.lookup(&self.name, self.group.as_deref())
    }
}

impl fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{}:{}", group, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<&str> for IdentityRef {
    fn from(reference: &str) -> Self {
        IdentityRef::parse(reference)
    }
}

/// Input values handed to a composite's compute function.
///
/// Required inputs are always present; desired inputs may be missing.
#[derive(Debug)]
pub struct CompositeInputs<'a> {
    required: Vec<&'a Value>,
    desired: Vec<Option<&'a Value>>,
}

impl<'a> CompositeInputs<'a> {
    /// Value of the `index`-th required input, in declaration order.
    pub fn required(&self, index: usize) -> Option<&'a Value> {
        self.required.get(index).copied()
    }

    pub fn desired(&self, index: usize) -> Option<&'a Value> {
        self.desired.get(index).copied().flatten()
    }
}

/// `None` means the composite does not apply to this input; it is dropped quietly.
pub type ComputeFn = fn(&CompositeInputs<'_>) -> Option<Value>;

#[derive(Debug, Clone)]
pub struct CompositeDescriptor {
    pub name: &'static str,
    pub group: &'static str,
    pub require: Vec<IdentityRef>,
    pub desire: Vec<IdentityRef>,
    pub inhibit: Vec<IdentityRef>,
    pub compute: ComputeFn,
    pub priority: i32,
}

impl CompositeDescriptor {
    pub fn new(name: &'static str, compute: ComputeFn) -> Self {
        Self {
            name,
            group: COMPOSITE_GROUP,
            require: Vec::new(),
            desire: Vec::new(),
            inhibit: Vec::new(),
            compute,
            priority: 0,
        }
    }

    pub fn group(mut self, group: &'static str) -> Self {
        self.group = group;
        self
    }

    pub fn require(mut self, reference: &str) -> Self {
        self.require.push(IdentityRef::parse(reference));
        self
    }

    pub fn desire(mut self, reference: &str) -> Self {
        self.desire.push(IdentityRef::parse(reference));
        self
    }

    pub fn inhibit(mut self, reference: &str) -> Self {
        self.inhibit.push(IdentityRef::parse(reference));
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn identity(&self) -> QualifiedIdentity {
        QualifiedIdentity::new(self.group, self.name)
    }
}

/// Composite definitions in declaration order.
#[derive(Debug, Clone, Default)]
pub struct CompositeTable {
    composites: Vec<CompositeDescriptor>,
}

impl CompositeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, composite: CompositeDescriptor) -> Self {
        self.composites.push(composite);
        self
    }

    pub fn push(&mut self, composite: CompositeDescriptor) {
        self.composites.push(composite);
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompositeDescriptor> {
        self.composites.iter()
    }

    pub fn len(&self) -> usize {
        self.composites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.composites.is_empty()
    }
}

/// What happened in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSummary {
    /// 1-based pass number.
    pub pass: usize,
    /// Names of the composites built in this pass, in declaration order.
    pub built: Vec<&'static str>,
    /// Composites still pending after the pass.
    pub deferred: usize,
    /// Whether pending desired inputs were treated as absent.
    pub relaxed: bool,
}

impl PassSummary {
    pub fn made_progress(&self) -> bool {
        !self.built.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Derived entries in build order.
    pub entries: Vec<ExtractedEntry>,
    pub warnings: Vec<Warning>,
    pub passes: Vec<PassSummary>,
}

impl Resolution {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.identity.name == name)
            .and_then(|entry| entry.value.decoded())
    }
}

enum Outcome {
    Build(Value, Vec<QualifiedIdentity>),
    Defer { desired_only: bool },
    Drop,
    Fail(String),
}

/// Runs the composite table against an extracted tag set.
///
/// The input store is not modified; derived entries are returned in
/// [`Resolution::entries`].
pub fn resolve(store: &TagStore, table: &CompositeTable) -> Resolution {
    let descriptors: Vec<&CompositeDescriptor> = table.iter().collect();
    let mut working = store.clone();
    let mut pending: Vec<usize> = (0..descriptors.len()).collect();
    let mut resolution = Resolution::default();
    let mut relaxed = false;

    info!("Resolving {} composites against {} tags", descriptors.len(), store.len());
    loop {
        let pass = resolution.passes.len() + 1;
        let pending_ids: Vec<QualifiedIdentity> = pending.iter().map(|&i| descriptors[i].identity()).collect();
        let mut progressed = false;
        let mut blocked_on_desired = false;
        let mut still = Vec::new();
        let mut built = Vec::new();
        let mut names = Vec::new();

        for &index in &pending {
            let composite = descriptors[index];
            let own = composite.identity();
            let is_pending = |reference: &IdentityRef| pending_ids.iter().any(|id| reference.matches(id));

            match evaluate(composite, &working, &is_pending, relaxed) {
                Outcome::Build(value, sources) => {
                    trace!("Pass {}: built {} = {}", pass, own, value);
                    names.push(composite.name);
                    built.push(ExtractedEntry {
                        identity: own,
                        value: EntryValue::Decoded(value),
                        provenance: Provenance::Derived { sources },
                        priority: composite.priority,
                    });
                    progressed = true;
                }
                Outcome::Defer { desired_only } => {
                    blocked_on_desired |= desired_only;
                    still.push(index);
                }
                Outcome::Drop => {
                    trace!("Pass {}: {} dropped", pass, own);
                    progressed = true;
                }
                Outcome::Fail(reason) => {
                    let error = MetaError::UnresolvableComposite {
                        name: own.to_string(),
                        reason,
                    };
                    push_warning(&mut resolution.warnings, Severity::Minor, composite, &error);
                    progressed = true;
                }
            }
        }

        for entry in built {
            working.insert(entry.clone());
            resolution.entries.push(entry);
        }
        resolution.passes.push(PassSummary {
            pass,
            built: names,
            deferred: still.len(),
            relaxed,
        });
        debug!("Pass {}: {} pending{}", pass, still.len(), if relaxed { " (relaxed)" } else { "" });
        pending = still;

        if progressed {
            relaxed = false;
            continue;
        }
        if blocked_on_desired && !relaxed {
            relaxed = true;
            continue;
        }
        break;
    }

    for &index in &pending {
        let composite = descriptors[index];
        let error = MetaError::UnresolvableComposite {
            name: composite.identity().to_string(),
            reason: "dependency cycle".to_string(),
        };
        push_warning(&mut resolution.warnings, Severity::Warning, composite, &error);
    }
    info!(
        "Resolved {} composites in {} passes ({} unresolvable)",
        resolution.entries.len(),
        resolution.passes.len(),
        pending.len()
    );
    resolution
}

fn evaluate(
    composite: &CompositeDescriptor,
    working: &TagStore,
    is_pending: &dyn Fn(&IdentityRef) -> bool,
    relaxed: bool,
) -> Outcome {
    if let Some(inhibitor) = composite.inhibit.iter().find(|r| r.lookup(working).is_some()) {
        trace!("{} inhibited by {}", composite.name, inhibitor);
        return Outcome::Drop;
    }
    if composite.inhibit.iter().any(|r| is_pending(r)) {
        return Outcome::Defer { desired_only: false };
    }

    let mut sources = Vec::new();
    let mut required = Vec::with_capacity(composite.require.len());
    let mut waiting = false;
    for reference in &composite.require {
        match reference.lookup(working) {
            Some(entry) => match entry.value.decoded() {
                Some(value) => {
                    sources.push(entry.identity.clone());
                    required.push(value);
                }
                None => return Outcome::Fail(format!("{} was not decoded", reference)),
            },
            None if is_pending(reference) => waiting = true,
            None => return Outcome::Fail(format!("missing {}", reference)),
        }
    }
    if waiting {
        return Outcome::Defer { desired_only: false };
    }

    let mut desired = Vec::with_capacity(composite.desire.len());
    for reference in &composite.desire {
        match reference.lookup(working) {
            Some(entry) => {
                let value = entry.value.decoded();
                if value.is_some() {
                    sources.push(entry.identity.clone());
                }
                desired.push(value);
            }
            None if !relaxed && is_pending(reference) => return Outcome::Defer { desired_only: true },
            None => desired.push(None),
        }
    }

    let inputs = CompositeInputs { required, desired };
    match (composite.compute)(&inputs) {
        Some(value) => Outcome::Build(value, sources),
        None => Outcome::Drop,
    }
}

fn push_warning(warnings: &mut Vec<Warning>, severity: Severity, composite: &CompositeDescriptor, error: &MetaError) {
    let path = DirectoryPath::root(composite.group);
    match severity {
        Severity::Minor => trace!("{}: {}", path, error),
        _ => debug!("{}: {}", path, error),
    }
    warnings.push(Warning {
        severity,
        path,
        kind: error.kind(),
        message: error.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_refs_parse_optional_group() {
        assert_eq!(IdentityRef::parse("Make").group, None);
        let qualified = IdentityRef::parse("IFD0:Make");
        assert_eq!(qualified.group.as_deref(), Some("IFD0"));
        assert_eq!(qualified.name, "Make");
        assert_eq!(qualified.to_string(), "IFD0:Make");
    }

    #[test]
    fn desired_inputs_may_be_missing() {
        let inputs = CompositeInputs {
            required: vec![],
            desired: vec![None],
        };
        assert!(inputs.desired(0).is_none());
        assert!(inputs.desired(3).is_none());
        assert!(inputs.required(0).is_none());
    }
}
