//! Tabular action values for the foraging agents.
//!
//! Each agent owns a [`PolicyLookup`]: one grid of [`Policy`] cells used while
//! the agent carries food, plus one grid per possible count of deposited food
//! (`0..=food_count`) used while its hands are empty. All grids live in a
//! single [`LayeredGrid`], layer 0 being the carrying table.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    Error, Result, Vector2,
    grid::LayeredGrid,
    world::{ACTION_COUNT, Action, EnvState},
};

/// Step size α of the temporal-difference update.
pub const LEARNING_RATE: f64 = 0.10;
/// Discount γ applied to the next state's best value.
pub const DISCOUNT_FACTOR: f64 = 0.90;

const HAS_FOOD_LAYER: usize = 0;

/// Q-values of one discretized state, indexed by [`Action::index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Policy {
    pub q_values: [f64; ACTION_COUNT],
}

impl Policy {
    /// Action with the highest value; ties go to the lowest index.
    pub fn best_action(&self) -> Action {
        let mut best = 0;
        for (index, q) in self.q_values.iter().enumerate().skip(1) {
            if *q > self.q_values[best] {
                best = index;
            }
        }
        Action::ALL[best]
    }

    pub fn max_q(&self) -> f64 {
        self.q_values[self.best_action().index()]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyLookup {
    food_count: usize,
    tables: LayeredGrid<Policy>,
}

impl PolicyLookup {
    /// Creates zero-initialized tables for a grid and a total food count.
    pub fn new(grid_size: Vector2, food_count: usize) -> Self {
        let width = usize::try_from(grid_size.x).unwrap_or(0);
        let height = usize::try_from(grid_size.y).unwrap_or(0);
        PolicyLookup {
            food_count,
            tables: LayeredGrid::new(food_count + 2, width, height),
        }
    }

    pub fn food_count(&self) -> usize {
        self.food_count
    }

    pub fn width(&self) -> usize {
        self.tables.width()
    }

    pub fn height(&self) -> usize {
        self.tables.height()
    }

    /// Every Q-value in storage order.
    pub fn q_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.tables.iter().flat_map(|p| p.q_values)
    }

    fn layer(carrying: bool, food_deposited: usize) -> usize {
        if carrying {
            HAS_FOOD_LAYER
        } else {
            1 + food_deposited
        }
    }

    /// Cell of the table used while carrying food.
    pub fn has_food(&self, location: Vector2) -> Option<&Policy> {
        self.tables.get(HAS_FOOD_LAYER, location)
    }

    /// Cell of the empty-handed table for a given deposited count.
    pub fn no_food(&self, food_deposited: usize, location: Vector2) -> Option<&Policy> {
        if food_deposited > self.food_count {
            return None;
        }
        self.tables.get(Self::layer(false, food_deposited), location)
    }

    /// The single cell addressed by `agent` in `state`.
    ///
    /// # Panics
    ///
    /// Panics if `agent` is not an index into `state`.
    pub fn policy(&self, agent: usize, state: &EnvState) -> Result<&Policy> {
        let location = state.agent_locations[agent];
        let policy = if state.carrying_food[agent] {
            self.has_food(location)
        } else {
            self.no_food(state.food_deposited, location)
        };
        policy.ok_or(Error::LocationOutsideTable(location))
    }

    fn policy_mut(&mut self, agent: usize, state: &EnvState) -> Result<&mut Policy> {
        let location = state.agent_locations[agent];
        if !state.carrying_food[agent] && state.food_deposited > self.food_count {
            return Err(Error::LocationOutsideTable(location));
        }
        let layer = Self::layer(state.carrying_food[agent], state.food_deposited);
        self.tables
            .get_mut(layer, location)
            .ok_or(Error::LocationOutsideTable(location))
    }

    /// Epsilon-greedy selection: exploit when a uniform draw exceeds
    /// `epsilon`, otherwise pick a uniformly random action.
    pub fn get_action<R: Rng + ?Sized>(
        &self,
        agent: usize,
        state: &EnvState,
        epsilon: f64,
        rng: &mut R,
    ) -> Result<Action> {
        if rng.random::<f64>() > epsilon {
            Ok(self.policy(agent, state)?.best_action())
        } else {
            Ok(Action::ALL[rng.random_range(0..ACTION_COUNT)])
        }
    }

    /// One-step Q-learning update of the cell addressed by `old_state`:
    ///
    /// Q(s,a) ← Q(s,a) + α[r + γ max_a' Q(s',a') − Q(s,a)]
    pub fn update(
        &mut self,
        agent: usize,
        old_state: &EnvState,
        new_state: &EnvState,
        action: Action,
        reward: f64,
    ) -> Result<()> {
        let target = reward + DISCOUNT_FACTOR * self.policy(agent, new_state)?.max_q();
        let policy = self.policy_mut(agent, old_state)?;
        let predict = policy.q_values[action.index()];
        policy.q_values[action.index()] += LEARNING_RATE * (target - predict);
        Ok(())
    }
}
