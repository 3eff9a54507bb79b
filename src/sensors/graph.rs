//! Dependency wiring: one-pass, best-effort linker
//!
//! Each node declares the sensor *kinds* it consumes; the builder resolves
//! them against the instantiated node set in discovery order, binding the
//! first still-active node of the required kind. A node that cannot be
//! fully wired is dropped (with symmetric undo of the edges bound so far in
//! this pass) and processing continues — one failed node never aborts the
//! build. Cycles are not detected; the "first match still active" rule
//! makes an accidental cycle fail silently, which is the accepted behavior.

use crate::error::Error;
use crate::sensors::{Handle, SensorRegistry};
use std::collections::HashSet;

/// Result of a wiring pass.
#[derive(Debug, Default)]
pub struct WireOutcome {
    /// Fully wired nodes, discovery order
    pub active: Vec<Handle>,
    /// Nodes excluded for unsatisfiable dependencies, with the wiring error
    pub dropped: Vec<(Handle, Error)>,
}

/// Wire every node's dependency slots. Mutates `deps`/`dependents` on the
/// registry nodes and returns the active/dropped partition.
pub fn wire(registry: &mut SensorRegistry) -> WireOutcome {
    let handles: Vec<Handle> = registry.handles().collect();
    let mut active: HashSet<Handle> = handles.iter().copied().collect();
    let mut outcome = WireOutcome::default();

    for &handle in &handles {
        let kind = match registry.get(handle) {
            Some(node) => node.info.kind,
            None => continue,
        };

        let mut bound: Vec<Handle> = Vec::new();
        let mut failed = None;

        for &dep_kind in kind.dependencies() {
            let provider = handles.iter().copied().find(|&h| {
                h != handle
                    && active.contains(&h)
                    && registry.get(h).is_some_and(|n| n.info.kind == dep_kind)
            });

            match provider {
                Some(p) => bound.push(p),
                None => {
                    failed = Some(dep_kind);
                    break;
                }
            }
        }

        if let Some(dep_kind) = failed {
            // Symmetric undo: nothing bound in this pass survives
            bound.clear();
            active.remove(&handle);
            let err = Error::DependencyUnsatisfied {
                sensor: registry
                    .get(handle)
                    .map(|n| n.info.name.clone())
                    .unwrap_or_default(),
                dependency: dep_kind.to_string(),
            };
            log::error!("{err}");
            outcome.dropped.push((handle, err));
            continue;
        }

        for &provider in &bound {
            if let Some(node) = registry.get_mut(provider) {
                node.dependents.push(handle);
            }
        }
        if let Some(node) = registry.get_mut(handle) {
            node.deps = bound;
        }
        outcome.active.push(handle);
    }

    outcome
}
