//! Serialized training output: the trained network together with the frozen
//! normalization statistics and the action set it was trained against.
//!
//! Written once at job completion; anything loading the artifact gets the
//! exact transform the workers trained with.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::network::QNetwork;
use crate::normalizer::NormalizationParams;
use crate::timeline::ActionSet;

#[derive(Serialize, Deserialize)]
pub struct ModelArtifact {
    pub network: QNetwork,
    pub normalization: NormalizationParams,
    pub actions: ActionSet,
}

impl ModelArtifact {
    /// Serialize the artifact to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serialized = bincode::serialize(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    /// Load an artifact previously written by [`ModelArtifact::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path)?;
        let artifact = bincode::deserialize(&data)?;
        Ok(artifact)
    }
}
