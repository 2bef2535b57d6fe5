//! Pipeline graph builder - validates steps into an immutable DAG

use crate::core::{error::ConfigError, step::Step};
use std::collections::{BTreeSet, HashMap};

/// Index of a step in the graph arena
pub type StepIndex = usize;

/// Validated step graph
///
/// Steps live in an arena in declaration order; edges are index lists, so the
/// graph can be shared read-only across tasks.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    steps: Vec<Step>,
    index: HashMap<String, StepIndex>,
    dependencies: Vec<Vec<StepIndex>>,
    dependents: Vec<Vec<StepIndex>>,
    topological_order: Vec<StepIndex>,
}

impl PipelineGraph {
    /// Check id uniqueness, `wait_for` references and acyclicity
    pub fn build(steps: Vec<Step>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.id.clone(), i).is_some() {
                return Err(ConfigError::DuplicateId(step.id.clone()));
            }
        }

        let mut dependencies = vec![Vec::new(); steps.len()];
        let mut dependents = vec![Vec::new(); steps.len()];
        for (i, step) in steps.iter().enumerate() {
            for dep in &step.wait_for {
                let &d = index.get(dep).ok_or_else(|| ConfigError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                })?;
                if !dependencies[i].contains(&d) {
                    dependencies[i].push(d);
                    dependents[d].push(i);
                }
            }
        }

        check_cycles(&steps, &dependencies)?;
        let topological_order = topological_sort(&dependencies, &dependents);

        Ok(Self {
            steps,
            index,
            dependencies,
            dependents,
            topological_order,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, index: StepIndex) -> &Step {
        &self.steps[index]
    }

    pub fn index_of(&self, id: &str) -> Option<StepIndex> {
        self.index.get(id).copied()
    }

    pub fn step_by_id(&self, id: &str) -> Option<&Step> {
        self.index_of(id).map(|i| &self.steps[i])
    }

    /// Direct dependencies of a step
    pub fn dependencies(&self, index: StepIndex) -> &[StepIndex] {
        &self.dependencies[index]
    }

    /// Steps that directly wait for this one
    pub fn dependents(&self, index: StepIndex) -> &[StepIndex] {
        &self.dependents[index]
    }

    /// Every step that depends on `index` directly or indirectly
    pub fn transitive_dependents(&self, index: StepIndex) -> Vec<StepIndex> {
        let mut seen = vec![false; self.steps.len()];
        let mut stack = vec![index];
        let mut result = Vec::new();
        while let Some(current) = stack.pop() {
            for &next in &self.dependents[current] {
                if !seen[next] {
                    seen[next] = true;
                    result.push(next);
                    stack.push(next);
                }
            }
        }
        result.sort_unstable();
        result
    }

    /// Dependency order, ties broken by declaration order
    pub fn execution_order(&self) -> &[StepIndex] {
        &self.topological_order
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

fn check_cycles(steps: &[Step], dependencies: &[Vec<StepIndex>]) -> Result<(), ConfigError> {
    let mut marks = vec![Mark::Unvisited; steps.len()];
    let mut path = Vec::new();

    for start in 0..steps.len() {
        if marks[start] == Mark::Unvisited {
            dfs_check(start, steps, dependencies, &mut marks, &mut path)?;
        }
    }
    Ok(())
}

fn dfs_check(
    node: StepIndex,
    steps: &[Step],
    dependencies: &[Vec<StepIndex>],
    marks: &mut [Mark],
    path: &mut Vec<StepIndex>,
) -> Result<(), ConfigError> {
    marks[node] = Mark::InProgress;
    path.push(node);

    for &dep in &dependencies[node] {
        match marks[dep] {
            Mark::InProgress => {
                let start = path.iter().position(|&p| p == dep).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|&i| steps[i].id.clone()).collect();
                cycle.push(steps[dep].id.clone());
                return Err(ConfigError::Cycle(cycle));
            }
            Mark::Unvisited => dfs_check(dep, steps, dependencies, marks, path)?,
            Mark::Done => {}
        }
    }

    path.pop();
    marks[node] = Mark::Done;
    Ok(())
}

fn topological_sort(dependencies: &[Vec<StepIndex>], dependents: &[Vec<StepIndex>]) -> Vec<StepIndex> {
    let mut remaining: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<StepIndex> = remaining
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(dependencies.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }
    order
}
