//! Validated, immutable collection of stage definitions.
//!
//! The registry is built once from a stage list and an initial stage name,
//! validated eagerly, then shared behind an `Arc` for the lifetime of the
//! engine. All lookups after construction are infallible in the sense that
//! every declared target is known to exist.

use crate::core::stage::Stage;
use crate::error::ConfigurationError;
use std::collections::HashMap;

/// Immutable stage graph, validated at construction.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    initial: String,
    stages: Vec<Stage>,
    index: HashMap<String, usize>,
}

impl StageRegistry {
    /// Validate and build a registry.
    ///
    /// Checks, in order: at least one stage, nonempty unique names, the
    /// initial stage exists, every transition target exists, and no stage
    /// declares more than one time-triggered transition.
    pub fn new(initial: String, stages: Vec<Stage>) -> Result<Self, ConfigurationError> {
        if stages.is_empty() {
            return Err(ConfigurationError::NoStages);
        }

        let mut index = HashMap::with_capacity(stages.len());
        for (i, stage) in stages.iter().enumerate() {
            if stage.name.is_empty() {
                return Err(ConfigurationError::EmptyStageName);
            }
            if index.insert(stage.name.clone(), i).is_some() {
                return Err(ConfigurationError::DuplicateStage(stage.name.clone()));
            }
        }

        if !index.contains_key(&initial) {
            return Err(ConfigurationError::UnknownInitialStage(initial));
        }

        for stage in &stages {
            let mut timed = 0usize;
            for transition in &stage.transitions {
                if !index.contains_key(&transition.target) {
                    return Err(ConfigurationError::UnknownTarget {
                        stage: stage.name.clone(),
                        target: transition.target.clone(),
                    });
                }
                if transition.after.is_some() {
                    timed += 1;
                }
            }
            if timed > 1 {
                return Err(ConfigurationError::DuplicateTimer(stage.name.clone()));
            }
        }

        Ok(Self {
            initial,
            stages,
            index,
        })
    }

    /// Name of the stage the flow starts in.
    pub fn initial(&self) -> &str {
        &self.initial
    }

    /// Look up a stage by name.
    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Whether a stage with this name is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All stages in declaration order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Number of declared stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
