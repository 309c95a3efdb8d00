use serde::{Deserialize, Serialize};

/// Statistics gathered while training one episode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Episode {
    /// Mean reward across agents, one entry per training step.
    pub average_rewards: Vec<f64>,
}

impl Episode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, average_reward: f64) {
        self.average_rewards.push(average_reward);
    }

    /// Number of training steps recorded.
    pub fn steps(&self) -> usize {
        self.average_rewards.len()
    }

    /// Average reward of the last recorded step.
    pub fn final_reward(&self) -> Option<f64> {
        self.average_rewards.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_episode_has_no_final_reward() {
        let episode = Episode::new();
        assert_eq!(episode.steps(), 0);
        assert_eq!(episode.final_reward(), None);
    }

    #[test]
    fn records_append_in_order() {
        let mut episode = Episode::new();
        episode.record(-1.0);
        episode.record(10.0);
        assert_eq!(episode.steps(), 2);
        assert_eq!(episode.final_reward(), Some(10.0));
        assert_eq!(episode.average_rewards, vec![-1.0, 10.0]);
    }
}
