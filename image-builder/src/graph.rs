//! Stage dependency graph.

use crate::errors::{CycleDetectedError, DefinitionError, Result};
use std::collections::BTreeMap;

/// Dependencies between stages, as discovered while rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageGraph {
    nodes: BTreeMap<String, Vec<String>>,
}

impl StageGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stage and the stages it depends on, replacing any previous
    /// entry for that stage.
    pub fn add_node<I, S>(&mut self, name: impl Into<String>, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nodes
            .insert(name.into(), dependencies.into_iter().map(Into::into).collect());
    }

    /// Returns true if the stage is known.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Returns the direct dependencies of a stage.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Option<&[String]> {
        self.nodes.get(name).map(Vec::as_slice)
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no stage.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns a build order for `requested`: every stage appears once and
    /// after all the stages it depends on.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::UnknownStage`] for a name missing from the
    /// graph and a [`CycleDetectedError`] if the graph loops.
    pub fn resolve_order<S: AsRef<str>>(&self, requested: &[S]) -> Result<Vec<String>> {
        let mut walk = Vec::new();
        let mut path = Vec::new();
        for name in requested {
            self.expand(name.as_ref(), &mut path, &mut walk)?;
        }

        let mut order: Vec<String> = Vec::with_capacity(walk.len());
        for name in walk.into_iter().rev() {
            if !order.contains(&name) {
                order.push(name);
            }
        }
        Ok(order)
    }

    fn expand(&self, name: &str, path: &mut Vec<String>, walk: &mut Vec<String>) -> Result<()> {
        let dependencies = self.nodes.get(name).ok_or_else(|| DefinitionError::UnknownStage {
            stage: name.to_string(),
        })?;

        if let Some(start) = path.iter().position(|p| p == name) {
            let mut cycle = path[start..].to_vec();
            cycle.push(name.to_string());
            return Err(CycleDetectedError::new(name, cycle).into());
        }

        walk.push(name.to_string());
        path.push(name.to_string());
        for dependency in dependencies {
            self.expand(dependency, path, walk)?;
        }
        path.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ImageBuilderError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_linear_chain() {
        let mut graph = StageGraph::new();
        graph.add_node("A", ["B"]);
        graph.add_node("B", ["C"]);
        graph.add_node("C", Vec::<String>::new());

        assert_eq!(graph.resolve_order(&["A"]).unwrap(), vec!["C", "B", "A"]);
    }

    #[test]
    fn test_shared_dependency_is_deduplicated() {
        let mut graph = StageGraph::new();
        graph.add_node("final", ["left", "right"]);
        graph.add_node("left", ["base"]);
        graph.add_node("right", ["base"]);
        graph.add_node("base", Vec::<String>::new());

        let order = graph.resolve_order(&["final"]).unwrap();

        assert_eq!(order.len(), 4);
        assert_eq!(order.first().map(String::as_str), Some("base"));
        assert_eq!(order.last().map(String::as_str), Some("final"));
    }

    #[test]
    fn test_dependencies_before_dependents() {
        let mut graph = StageGraph::new();
        graph.add_node("A", ["C", "B"]);
        graph.add_node("B", ["C"]);
        graph.add_node("C", ["D"]);
        graph.add_node("D", Vec::<String>::new());

        let order = graph.resolve_order(&["A"]).unwrap();
        let position = |name: &str| order.iter().position(|n| n == name).unwrap();

        assert!(position("D") < position("C"));
        assert!(position("C") < position("B"));
        assert!(position("B") < position("A"));
    }

    #[test]
    fn test_several_requests() {
        let mut graph = StageGraph::new();
        graph.add_node("app", ["base"]);
        graph.add_node("tools", ["base"]);
        graph.add_node("base", Vec::<String>::new());

        let order = graph.resolve_order(&["app", "tools"]).unwrap();
        assert_eq!(order, vec!["base", "tools", "app"]);
    }

    #[test]
    fn test_unknown_stage() {
        let mut graph = StageGraph::new();
        graph.add_node("A", ["missing"]);

        let err = graph.resolve_order(&["A"]).unwrap_err();
        assert!(matches!(
            err,
            ImageBuilderError::Definition(DefinitionError::UnknownStage { ref stage }) if stage == "missing"
        ));

        assert!(graph.resolve_order(&["nope"]).is_err());
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut graph = StageGraph::new();
        graph.add_node("A", ["B"]);
        graph.add_node("B", ["A"]);

        let err = graph.resolve_order(&["A"]).unwrap_err();
        let cycle = err.cycle().unwrap();
        assert_eq!(cycle.cycle_path, vec!["A", "B", "A"]);
    }

    #[test]
    fn test_empty_request() {
        let graph = StageGraph::new();
        assert!(graph.resolve_order::<&str>(&[]).unwrap().is_empty());
        assert!(graph.is_empty());
    }
}
