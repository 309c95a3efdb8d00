use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, Vector2};

/// Parameters describing a run. Every field is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct EnvParams {
    pub agent_count: usize,
    pub food_count: usize,
    pub obstacle_count: usize,
    pub nest_count: usize,
    pub grid_size: Vector2,
    pub seed: u64,
    pub max_steps: u64,
    pub episode_count: u64,
}

impl EnvParams {
    /// Reads parameters from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let params: EnvParams = serde_json::from_str(&text)?;
        params.validate()?;
        Ok(params)
    }

    /// Number of entities that need a cell of their own at initialization.
    pub fn entity_count(&self) -> usize {
        self.agent_count + self.food_count + self.obstacle_count + self.nest_count
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid_size.x <= 0 || self.grid_size.y <= 0 {
            return Err(Error::InvalidParams(format!(
                "grid size ({}, {}) must be positive",
                self.grid_size.x, self.grid_size.y
            )));
        }
        if self.max_steps == 0 {
            return Err(Error::InvalidParams("max steps must be at least 1".into()));
        }
        if self.episode_count == 0 {
            return Err(Error::InvalidParams(
                "episode count must be at least 1".into(),
            ));
        }
        let cells = i64::from(self.grid_size.x) * i64::from(self.grid_size.y);
        let needed = self.entity_count();
        if i64::try_from(needed).map_or(true, |n| n > cells) {
            return Err(Error::InvalidParams(format!(
                "{} entities do not fit on a {}x{} grid",
                needed, self.grid_size.x, self.grid_size.y
            )));
        }
        Ok(())
    }

    /// Stable key for persisted runs, e.g.
    /// `AgentCount1FoodCount30ObstacleCount10NestCount1GridSizeX10Y10Seed1MaxSteps100EpisodeCount10`.
    pub fn canonical_name(&self) -> String {
        format!(
            "AgentCount{}FoodCount{}ObstacleCount{}NestCount{}GridSizeX{}Y{}Seed{}MaxSteps{}EpisodeCount{}",
            self.agent_count,
            self.food_count,
            self.obstacle_count,
            self.nest_count,
            self.grid_size.x,
            self.grid_size.y,
            self.seed,
            self.max_steps,
            self.episode_count
        )
    }
}
