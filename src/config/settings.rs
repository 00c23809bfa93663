//! Runner settings

use serde::{Deserialize, Serialize};

/// Settings shared by the cross-validation and grid-search operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Seed handed to the K-fold splitter
    pub cv_seed: u64,
    /// Shuffle rows before assigning folds
    pub shuffle: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            cv_seed: 10,
            shuffle: false,
        }
    }
}

impl RunnerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the fold seed
    pub fn with_cv_seed(mut self, seed: u64) -> Self {
        self.cv_seed = seed;
        self
    }

    /// Builder method to enable shuffled folds
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }
}
