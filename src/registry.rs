//! In-memory registry of build steps and their last observed state.
//!
//! The registry is created once at startup from the configured step names
//! and lives for the whole process. It is owned by the reactor's top-level
//! task and shared as [`SharedRegistry`]; only the build-trigger task
//! mutates it, and only on the reactor thread, so status-page reads never
//! race with build-state writes.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Outcome of a completed build as recorded in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Success,
    Failure,
}

/// The tracked state of one named build step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepHistory {
    /// True while the pipeline for this step is running.
    pub is_building: bool,
    /// The result of the most recent completed build, if any.
    pub last_result: Option<BuildOutcome>,
}

/// Name → step mapping. `BTreeMap` so the status page renders in a
/// deterministic order.
#[derive(Debug, Default)]
pub struct StepRegistry {
    steps: BTreeMap<String, StepHistory>,
}

impl StepRegistry {
    /// Creates a registry with one idle, never-built entry per step name.
    pub fn new(step_names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        StepRegistry {
            steps: step_names
                .into_iter()
                .map(|name| (name.into(), StepHistory::default()))
                .collect(),
        }
    }

    /// Iterates steps in render order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StepHistory)> {
        self.steps.iter().map(|(name, step)| (name.as_str(), step))
    }

    /// Looks up a step by name.
    pub fn get(&self, name: &str) -> Option<&StepHistory> {
        self.steps.get(name)
    }

    /// Marks a step as building or idle.
    pub fn set_building(&mut self, name: &str, is_building: bool) {
        if let Some(step) = self.steps.get_mut(name) {
            step.is_building = is_building;
        }
    }

    /// Records the outcome of a completed build.
    pub fn record_result(&mut self, name: &str, result: BuildOutcome) {
        if let Some(step) = self.steps.get_mut(name) {
            step.last_result = Some(result);
        }
    }

    /// The configured step names, in render order.
    pub fn step_names(&self) -> Vec<String> {
        self.steps.keys().cloned().collect()
    }
}

/// Reactor-thread handle to the registry. `Rc<RefCell<_>>` rather than a
/// lock: all tasks that touch it run on the same thread.
pub type SharedRegistry = Rc<RefCell<StepRegistry>>;

/// Creates a shared registry from step names.
pub fn shared_registry(step_names: impl IntoIterator<Item = impl Into<String>>) -> SharedRegistry {
    Rc::new(RefCell::new(StepRegistry::new(step_names)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_steps_are_idle_and_unbuilt() {
        let registry = StepRegistry::new(["app"]);
        let step = registry.get("app").unwrap();
        assert!(!step.is_building);
        assert_eq!(step.last_result, None);
    }

    #[test]
    fn iteration_order_is_deterministic() {
        let registry = StepRegistry::new(["zeta", "alpha", "mid"]);
        let names: Vec<_> = registry.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn record_result_updates_only_named_step() {
        let mut registry = StepRegistry::new(["a", "b"]);
        registry.record_result("a", BuildOutcome::Failure);
        assert_eq!(
            registry.get("a").unwrap().last_result,
            Some(BuildOutcome::Failure)
        );
        assert_eq!(registry.get("b").unwrap().last_result, None);
    }

    #[test]
    fn set_building_round_trips() {
        let mut registry = StepRegistry::new(["a"]);
        registry.set_building("a", true);
        assert!(registry.get("a").unwrap().is_building);
        registry.set_building("a", false);
        assert!(!registry.get("a").unwrap().is_building);
    }

    #[test]
    fn unknown_step_updates_are_ignored() {
        let mut registry = StepRegistry::new(["a"]);
        registry.set_building("ghost", true);
        registry.record_result("ghost", BuildOutcome::Success);
        assert!(registry.get("ghost").is_none());
    }
}
