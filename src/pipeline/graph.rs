use std::collections::{BTreeSet, HashSet};

use indexmap::IndexMap;

use super::definition::{is_valid_stage_name, PipelineDefinition};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("pipeline has no stages")]
    EmptyPipeline,

    #[error("invalid stage name '{0}'; use letters, digits, '-' and '_'")]
    InvalidStageName(String),

    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),

    #[error("stage {0} is listed as a dependency of stage {1} but does not exist")]
    DependencyNotFound(String, String),

    #[error("stage {0} depends on itself")]
    SelfDependency(String),

    #[error("a dependency from stage {0} to stage {1} creates a cycle")]
    Cycle(String, String),
}

/// Dependency graph of a pipeline's stages.
///
/// Edges point from parent to child. Nodes keep declaration order, which is
/// also the tie-breaker for the execution order.
#[derive(Debug, Clone)]
pub struct StageGraph {
    parents: IndexMap<String, Vec<String>>,
    children: IndexMap<String, Vec<String>>,
    order: Vec<String>,
}

impl StageGraph {
    /// Builds and validates the graph for a definition.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] for an empty pipeline, a bad or duplicated
    /// stage name, a dependency on an unknown stage or on itself, or a cycle.
    pub fn build(definition: &PipelineDefinition) -> Result<Self, GraphError> {
        if definition.stages.is_empty() {
            return Err(GraphError::EmptyPipeline);
        }

        let mut parents: IndexMap<String, Vec<String>> = IndexMap::new();
        let mut children: IndexMap<String, Vec<String>> = IndexMap::new();

        // Add all nodes first.
        for stage in &definition.stages {
            if !is_valid_stage_name(&stage.name) {
                return Err(GraphError::InvalidStageName(stage.name.clone()));
            }
            if parents.contains_key(&stage.name) {
                return Err(GraphError::DuplicateStage(stage.name.clone()));
            }
            parents.insert(stage.name.clone(), Vec::new());
            children.insert(stage.name.clone(), Vec::new());
        }

        let mut graph = Self {
            parents,
            children,
            order: Vec::new(),
        };

        // Then add all edges.
        let mut previous: Option<&str> = None;
        for stage in &definition.stages {
            let needs: Vec<String> = match &stage.needs {
                Some(needs) => needs.clone(),
                None => previous.map(|p| vec![p.to_string()]).unwrap_or_default(),
            };

            for dep in needs {
                if dep == stage.name {
                    return Err(GraphError::SelfDependency(dep));
                }
                if !graph.parents.contains_key(&dep) {
                    return Err(GraphError::DependencyNotFound(dep, stage.name.clone()));
                }
                graph.add_edge(&dep, &stage.name)?;
            }

            previous = Some(stage.name.as_str());
        }

        graph.order = graph.topological_order();
        Ok(graph)
    }

    fn add_edge(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        if self.reaches(to, from) {
            return Err(GraphError::Cycle(from.to_string(), to.to_string()));
        }

        let Some(siblings) = self.parents.get_mut(to) else {
            return Err(GraphError::DependencyNotFound(to.to_string(), from.to_string()));
        };
        if siblings.iter().any(|p| p == from) {
            return Ok(());
        }
        siblings.push(from.to_string());

        if let Some(next) = self.children.get_mut(from) {
            next.push(to.to_string());
        }

        Ok(())
    }

    /// Whether `target` is reachable from `start` by following child edges.
    fn reaches(&self, start: &str, target: &str) -> bool {
        let mut stack = vec![start];
        let mut seen = HashSet::new();

        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            if let Some(next) = self.children.get(node) {
                stack.extend(next.iter().map(String::as_str));
            }
        }

        false
    }

    /// Kahn's algorithm, always releasing the earliest-declared ready stage.
    fn topological_order(&self) -> Vec<String> {
        let index_of = |name: &str| self.parents.get_index_of(name).unwrap_or(usize::MAX);

        let mut remaining: IndexMap<&str, usize> = self
            .parents
            .iter()
            .map(|(name, parents)| (name.as_str(), parents.len()))
            .collect();

        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| index_of(*name))
            .collect();

        let mut order = Vec::with_capacity(self.parents.len());

        while let Some(idx) = ready.pop_first() {
            let Some((name, children)) = self.children.get_index(idx) else {
                continue;
            };
            order.push(name.clone());

            for child in children {
                if let Some(count) = remaining.get_mut(child.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(index_of(child.as_str()));
                    }
                }
            }
        }

        order
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn parents(&self, stage: &str) -> &[String] {
        self.parents.get(stage).map_or(&[], Vec::as_slice)
    }

    pub fn children(&self, stage: &str) -> &[String] {
        self.children.get(stage).map_or(&[], Vec::as_slice)
    }

    /// Every stage transitively downstream of `stage`, in execution order.
    pub fn descendants(&self, stage: &str) -> Vec<String> {
        let mut found = HashSet::new();
        let mut stack: Vec<&str> = self.children(stage).iter().map(String::as_str).collect();

        while let Some(node) = stack.pop() {
            if found.insert(node.to_string()) {
                stack.extend(self.children(node).iter().map(String::as_str));
            }
        }

        self.order
            .iter()
            .filter(|name| found.contains(*name))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }
}
