//! Stage registry backed by a petgraph DAG.
//!
//! This module provides [`StageRegistry`] and [`StageRegistryBuilder`] for
//! declaring which stages a pipeline runs, in what order, and which of them
//! are gated by the approval gate.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

use crate::{FolioError, Result, Stage, StageKind};

/// What follows a stage in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Successor {
    /// Another stage follows.
    Next(Stage),
    /// The stage is the last one; completing it completes the workflow.
    Terminal,
}

/// A registered stage.
#[derive(Debug, Clone, Copy)]
struct RegisteredStage {
    stage: Stage,
    kind: StageKind,
}

/// The static, ordered definition of a pipeline.
///
/// The registry is validated once at construction and never mutated
/// afterwards. Transitions must form a single linear chain: one first
/// stage, one terminal stage, no branches and no cycles.
///
/// # Example
///
/// ```
/// use folio::{Stage, StageKind, StageRegistry, Successor};
///
/// let registry = StageRegistry::builder()
///     .stage(Stage::Research, StageKind::Generative)
///     .stage(Stage::OutlineValidation, StageKind::Gated)
///     .transition(Stage::Research, Stage::OutlineValidation)
///     .build()?;
///
/// assert_eq!(registry.first(), Stage::Research);
/// assert_eq!(registry.successor(Stage::OutlineValidation)?, Successor::Terminal);
/// # Ok::<(), folio::FolioError>(())
/// ```
#[derive(Debug, Clone)]
pub struct StageRegistry {
    /// Stages in pipeline order.
    order: Vec<RegisteredStage>,
    /// Mapping from stage to its position in `order`.
    positions: HashMap<Stage, usize>,
}

impl StageRegistry {
    /// Creates a new registry builder.
    pub fn builder() -> StageRegistryBuilder {
        StageRegistryBuilder::new()
    }

    /// Builds a registry whose order is the order of `stages`.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::DuplicateStage`] if a stage appears twice and
    /// [`FolioError::InvalidRegistry`] if `stages` is empty.
    pub fn linear(stages: &[(Stage, StageKind)]) -> Result<Self> {
        let mut builder = Self::builder();
        for (stage, kind) in stages {
            builder = builder.stage(*stage, *kind);
        }
        for pair in stages.windows(2) {
            builder = builder.transition(pair[0].0, pair[1].0);
        }
        builder.build()
    }

    /// The content production pipeline.
    ///
    /// Research and content generation are generative; every other stage
    /// is gated.
    pub fn content_pipeline() -> Self {
        let order: Vec<RegisteredStage> = Stage::ALL
            .into_iter()
            .map(|stage| RegisteredStage {
                stage,
                kind: match stage {
                    Stage::Research | Stage::ContentGeneration => StageKind::Generative,
                    _ => StageKind::Gated,
                },
            })
            .collect();
        let positions = order
            .iter()
            .enumerate()
            .map(|(index, registered)| (registered.stage, index))
            .collect();
        Self { order, positions }
    }

    /// Returns the stages in pipeline order.
    pub fn stages(&self) -> Vec<Stage> {
        self.order.iter().map(|registered| registered.stage).collect()
    }

    /// Returns the number of stages in the pipeline.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the registry has no stages.
    ///
    /// A built registry always has at least one stage.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns true if the stage is part of this pipeline.
    pub fn contains(&self, stage: Stage) -> bool {
        self.positions.contains_key(&stage)
    }

    /// The stage a new workflow starts at.
    pub fn first(&self) -> Stage {
        self.order[0].stage
    }

    /// The stage whose completion completes the workflow.
    pub fn terminal(&self) -> Stage {
        self.order[self.order.len() - 1].stage
    }

    /// Returns the 0-based position of a stage in the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::StageNotRegistered`] if the stage isn't part
    /// of this pipeline.
    pub fn position(&self, stage: Stage) -> Result<usize> {
        self.positions
            .get(&stage)
            .copied()
            .ok_or(FolioError::StageNotRegistered(stage))
    }

    /// Returns what follows the given stage.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::StageNotRegistered`] if the stage isn't part
    /// of this pipeline.
    pub fn successor(&self, stage: Stage) -> Result<Successor> {
        let position = self.position(stage)?;
        Ok(match self.order.get(position + 1) {
            Some(next) => Successor::Next(next.stage),
            None => Successor::Terminal,
        })
    }

    /// Returns whether the stage is gated or generative.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::StageNotRegistered`] if the stage isn't part
    /// of this pipeline.
    pub fn kind(&self, stage: Stage) -> Result<StageKind> {
        let position = self.position(stage)?;
        Ok(self.order[position].kind)
    }

    /// Returns true if the stage produces a validation for the gate.
    pub fn is_gated(&self, stage: Stage) -> Result<bool> {
        Ok(self.kind(stage)? == StageKind::Gated)
    }

    /// Returns the stages that precede `stage`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::StageNotRegistered`] if the stage isn't part
    /// of this pipeline.
    pub fn stages_before(&self, stage: Stage) -> Result<Vec<Stage>> {
        let position = self.position(stage)?;
        Ok(self.order[..position]
            .iter()
            .map(|registered| registered.stage)
            .collect())
    }

    /// Returns true if `completed` is exactly the first `completed.len()`
    /// stages of the pipeline, in order.
    pub fn is_prefix(&self, completed: &[Stage]) -> bool {
        completed.len() <= self.order.len()
            && completed
                .iter()
                .zip(&self.order)
                .all(|(stage, registered)| *stage == registered.stage)
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::content_pipeline()
    }
}

/// A transition recorded by the builder and resolved in `build`.
struct DeferredTransition {
    from: Stage,
    to: Stage,
}

/// Builder for constructing [`StageRegistry`] instances.
///
/// Problems are collected while building and reported by
/// [`build`](Self::build), so a misconfigured pipeline never panics.
pub struct StageRegistryBuilder {
    graph: DiGraph<RegisteredStage, ()>,
    stage_to_index: HashMap<Stage, NodeIndex>,
    deferred: Vec<DeferredTransition>,
    duplicate: Option<Stage>,
}

impl StageRegistryBuilder {
    fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            stage_to_index: HashMap::new(),
            deferred: Vec::new(),
            duplicate: None,
        }
    }

    /// Adds a stage to the pipeline.
    pub fn stage(mut self, stage: Stage, kind: StageKind) -> Self {
        if self.stage_to_index.contains_key(&stage) {
            self.duplicate.get_or_insert(stage);
            return self;
        }

        let index = self.graph.add_node(RegisteredStage { stage, kind });
        self.stage_to_index.insert(stage, index);
        self
    }

    /// Declares that `to` runs after `from` completes.
    pub fn transition(mut self, from: Stage, to: Stage) -> Self {
        self.deferred.push(DeferredTransition { from, to });
        self
    }

    /// Builds the registry, validating the transition graph.
    ///
    /// # Errors
    ///
    /// - [`FolioError::DuplicateStage`] if a stage was added twice
    /// - [`FolioError::StageNotRegistered`] if a transition references an
    ///   unknown stage
    /// - [`FolioError::RegistryCycle`] if the transitions form a cycle
    /// - [`FolioError::InvalidRegistry`] if the graph is empty or not a
    ///   single linear chain
    pub fn build(mut self) -> Result<StageRegistry> {
        if let Some(stage) = self.duplicate {
            return Err(FolioError::DuplicateStage(stage));
        }
        if self.graph.node_count() == 0 {
            return Err(FolioError::InvalidRegistry(
                "registry has no stages".to_string(),
            ));
        }

        for transition in &self.deferred {
            let from = self
                .stage_to_index
                .get(&transition.from)
                .ok_or(FolioError::StageNotRegistered(transition.from))?;
            let to = self
                .stage_to_index
                .get(&transition.to)
                .ok_or(FolioError::StageNotRegistered(transition.to))?;
            if self.graph.contains_edge(*from, *to) {
                return Err(FolioError::InvalidRegistry(format!(
                    "duplicate transition {} -> {}",
                    transition.from, transition.to
                )));
            }
            self.graph.add_edge(*from, *to, ());
        }

        if petgraph::algo::is_cyclic_directed(&self.graph) {
            return Err(FolioError::RegistryCycle);
        }

        for index in self.graph.node_indices() {
            let stage = self.graph[index].stage;
            let outgoing = self.graph.neighbors_directed(index, Direction::Outgoing).count();
            let incoming = self.graph.neighbors_directed(index, Direction::Incoming).count();
            if outgoing > 1 {
                return Err(FolioError::InvalidRegistry(format!(
                    "stage {} has {} successors",
                    stage, outgoing
                )));
            }
            if incoming > 1 {
                return Err(FolioError::InvalidRegistry(format!(
                    "stage {} has {} predecessors",
                    stage, incoming
                )));
            }
        }

        // Acyclic with in/out degree <= 1 is a set of chains; one root means one chain.
        let roots = self
            .graph
            .node_indices()
            .filter(|index| {
                self.graph
                    .neighbors_directed(*index, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .count();
        if roots != 1 {
            return Err(FolioError::InvalidRegistry(format!(
                "expected one linear pipeline, found {} disconnected chains",
                roots
            )));
        }

        let order: Vec<RegisteredStage> = petgraph::algo::toposort(&self.graph, None)
            .map_err(|_| FolioError::RegistryCycle)?
            .into_iter()
            .map(|index| self.graph[index])
            .collect();
        let positions = order
            .iter()
            .enumerate()
            .map(|(position, registered)| (registered.stage, position))
            .collect();

        Ok(StageRegistry { order, positions })
    }
}

impl Default for StageRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_pipeline_order() {
        let registry = StageRegistry::content_pipeline();
        assert_eq!(registry.stages(), Stage::ALL.to_vec());
        assert_eq!(registry.first(), Stage::Research);
        assert_eq!(registry.terminal(), Stage::FinalReview);
        assert_eq!(registry.len(), 8);
    }

    #[test]
    fn test_content_pipeline_kinds() {
        let registry = StageRegistry::content_pipeline();
        assert_eq!(registry.kind(Stage::Research).unwrap(), StageKind::Generative);
        assert_eq!(
            registry.kind(Stage::ContentGeneration).unwrap(),
            StageKind::Generative
        );
        assert!(registry.is_gated(Stage::OutlineValidation).unwrap());
        assert!(registry.is_gated(Stage::FinalReview).unwrap());
    }

    #[test]
    fn test_successor_and_position() {
        let registry = StageRegistry::content_pipeline();
        assert_eq!(
            registry.successor(Stage::OutlineValidation).unwrap(),
            Successor::Next(Stage::ContentGeneration)
        );
        assert_eq!(
            registry.successor(Stage::FinalReview).unwrap(),
            Successor::Terminal
        );
        assert_eq!(registry.position(Stage::Research).unwrap(), 0);
        assert_eq!(registry.position(Stage::SeoValidation).unwrap(), 6);
    }

    #[test]
    fn test_builder_matches_content_pipeline() {
        let stages: Vec<(Stage, StageKind)> = StageRegistry::content_pipeline()
            .stages()
            .into_iter()
            .map(|stage| {
                let kind = StageRegistry::content_pipeline().kind(stage).unwrap();
                (stage, kind)
            })
            .collect();
        let built = StageRegistry::linear(&stages).unwrap();
        assert_eq!(built.stages(), Stage::ALL.to_vec());
    }

    #[test]
    fn test_order_follows_transitions_not_insertion() {
        let registry = StageRegistry::builder()
            .stage(Stage::SeoValidation, StageKind::Gated)
            .stage(Stage::ContentGeneration, StageKind::Generative)
            .transition(Stage::ContentGeneration, Stage::SeoValidation)
            .build()
            .unwrap();
        assert_eq!(
            registry.stages(),
            vec![Stage::ContentGeneration, Stage::SeoValidation]
        );
    }

    #[test]
    fn test_single_stage_registry() {
        let registry = StageRegistry::builder()
            .stage(Stage::FinalReview, StageKind::Gated)
            .build()
            .unwrap();
        assert_eq!(registry.first(), Stage::FinalReview);
        assert_eq!(registry.terminal(), Stage::FinalReview);
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let result = StageRegistry::builder()
            .stage(Stage::Research, StageKind::Generative)
            .stage(Stage::Research, StageKind::Gated)
            .build();
        assert!(matches!(result, Err(FolioError::DuplicateStage(Stage::Research))));
    }

    #[test]
    fn test_cycle_rejected() {
        let result = StageRegistry::builder()
            .stage(Stage::OutlineValidation, StageKind::Gated)
            .stage(Stage::ContentGeneration, StageKind::Generative)
            .transition(Stage::OutlineValidation, Stage::ContentGeneration)
            .transition(Stage::ContentGeneration, Stage::OutlineValidation)
            .build();
        assert!(matches!(result, Err(FolioError::RegistryCycle)));
    }

    #[test]
    fn test_self_transition_rejected() {
        let result = StageRegistry::builder()
            .stage(Stage::Research, StageKind::Generative)
            .transition(Stage::Research, Stage::Research)
            .build();
        assert!(matches!(result, Err(FolioError::RegistryCycle)));
    }

    #[test]
    fn test_branching_rejected() {
        let result = StageRegistry::builder()
            .stage(Stage::Research, StageKind::Generative)
            .stage(Stage::PillarValidation, StageKind::Gated)
            .stage(Stage::SubpillarValidation, StageKind::Gated)
            .transition(Stage::Research, Stage::PillarValidation)
            .transition(Stage::Research, Stage::SubpillarValidation)
            .build();
        assert!(matches!(result, Err(FolioError::InvalidRegistry(_))));
    }

    #[test]
    fn test_disconnected_rejected() {
        let result = StageRegistry::builder()
            .stage(Stage::Research, StageKind::Generative)
            .stage(Stage::FinalReview, StageKind::Gated)
            .build();
        assert!(matches!(result, Err(FolioError::InvalidRegistry(_))));
    }

    #[test]
    fn test_unknown_stage_in_transition() {
        let result = StageRegistry::builder()
            .stage(Stage::Research, StageKind::Generative)
            .transition(Stage::Research, Stage::PillarValidation)
            .build();
        assert!(matches!(
            result,
            Err(FolioError::StageNotRegistered(Stage::PillarValidation))
        ));
    }

    #[test]
    fn test_empty_registry_rejected() {
        assert!(matches!(
            StageRegistry::builder().build(),
            Err(FolioError::InvalidRegistry(_))
        ));
    }

    #[test]
    fn test_unregistered_stage_queries() {
        let registry = StageRegistry::linear(&[
            (Stage::Research, StageKind::Generative),
            (Stage::PillarValidation, StageKind::Gated),
        ])
        .unwrap();
        assert!(!registry.contains(Stage::FinalReview));
        assert!(matches!(
            registry.successor(Stage::FinalReview),
            Err(FolioError::StageNotRegistered(Stage::FinalReview))
        ));
    }

    #[test]
    fn test_is_prefix() {
        let registry = StageRegistry::content_pipeline();
        assert!(registry.is_prefix(&[]));
        assert!(registry.is_prefix(&[Stage::Research, Stage::PillarValidation]));
        assert!(!registry.is_prefix(&[Stage::PillarValidation]));
        assert!(!registry.is_prefix(&[Stage::Research, Stage::Research]));
        assert!(registry.is_prefix(&Stage::ALL));
    }

    #[test]
    fn test_stages_before() {
        let registry = StageRegistry::content_pipeline();
        assert!(registry.stages_before(Stage::Research).unwrap().is_empty());
        assert_eq!(
            registry.stages_before(Stage::OutlineValidation).unwrap(),
            vec![
                Stage::Research,
                Stage::PillarValidation,
                Stage::SubpillarValidation
            ]
        );
    }
}
