//! Online Q-learning driven by world events.
//!
//! A [`Trainer`] holds everything learning needs besides the world itself.
//! It is shared with event subscribers as an `Rc<RefCell<Trainer>>` captured
//! by the closures that [`connect_training`], [`connect_testing`] and
//! [`connect_overlay`] register; the world reaches each subscriber as the
//! event's owner.

use std::{cell::RefCell, mem, rc::Rc};

use tracing::info;

use crate::{
    Error, Result, Vector2,
    episode::Episode,
    event::SubscriptionId,
    policy::PolicyLookup,
    world::{Action, EnvState, EpisodeMarker, Rendered, StepEnded, StepStarted, World},
};

/// Reward for bumping into an obstacle or the edge of the grid.
pub const BLOCKED_REWARD: f64 = -1000.0;
/// Reward for picking up dropped food.
pub const PICKUP_REWARD: f64 = 10.0;
/// Reward for depositing carried food at a nest.
pub const DEPOSIT_REWARD: f64 = 10.0;
/// Reward for any other successful move.
pub const STEP_REWARD: f64 = -1.0;

pub type SharedTrainer = Rc<RefCell<Trainer>>;

/// Applies `action` for one agent and returns its reward.
///
/// Outcomes are checked in order: blocked move, pickup, deposit at a nest,
/// plain move. Only the first that applies happens.
pub fn apply_action(world: &mut World, agent: usize, action: Action) -> f64 {
    if !world.try_move_agent(agent, action) {
        return BLOCKED_REWARD;
    }

    let location = world.agents[agent].location;
    if let Some(food) = world.on_dropped_food(location) {
        if world.give_food(agent, food) {
            return PICKUP_REWARD;
        }
    }

    if world.on_nest(location).is_some() {
        let held = world.agents[agent].food.clone();
        for food in held {
            if world.deposit(agent, food) {
                return DEPOSIT_REWARD;
            }
        }
    }

    STEP_REWARD
}

#[derive(Debug)]
pub struct Trainer {
    pub lookups: Vec<PolicyLookup>,
    pub episodes: Vec<Episode>,
    pub current_episode: Episode,
    pub epsilon: f64,
    pub decay_rate: f64,
    actions: Vec<Action>,
    rewards: Vec<f64>,
}

impl Trainer {
    /// Starts fully exploratory; epsilon reaches zero after `episode_count`
    /// decay steps.
    pub fn new(lookups: Vec<PolicyLookup>, episodes: Vec<Episode>, episode_count: u64) -> Self {
        Trainer {
            lookups,
            episodes,
            current_episode: Episode::new(),
            epsilon: 1.0,
            decay_rate: 1.0 / episode_count.max(1) as f64,
            actions: Vec::new(),
            rewards: Vec::new(),
        }
    }

    pub fn shared(self) -> SharedTrainer {
        Rc::new(RefCell::new(self))
    }

    fn check_agents(&self, world: &World) -> Result<()> {
        if self.lookups.len() != world.agents.len() {
            return Err(Error::LookupCountMismatch {
                expected: world.agents.len(),
                found: self.lookups.len(),
            });
        }
        Ok(())
    }

    /// Action `agent` would take at the current epsilon.
    fn select(&self, world: &mut World, agent: usize, state: &EnvState) -> Result<Action> {
        self.lookups[agent].get_action(agent, state, self.epsilon, world.rng())
    }

    pub fn on_training_step_started(&mut self, world: &mut World, args: &mut StepStarted) -> Result<()> {
        self.actions.clear();
        self.rewards.clear();

        for index in 0..world.agents.len() {
            let action = self.select(world, index, &args.state)?;
            self.actions.push(action);
            self.rewards.push(apply_action(world, index, action));
            world.agents[index].last_action = action;
        }
        Ok(())
    }

    pub fn on_training_step_ended(&mut self, _world: &mut World, args: &mut StepEnded) -> Result<()> {
        let mut total = 0.0;
        for (index, (action, reward)) in self.actions.iter().zip(&self.rewards).enumerate() {
            total += reward;
            self.lookups[index].update(index, &args.old_state, &args.new_state, *action, *reward)?;
        }

        let average = if self.rewards.is_empty() {
            0.0
        } else {
            total / self.rewards.len() as f64
        };
        self.current_episode.record(average);
        self.epsilon = (self.epsilon - self.decay_rate).max(0.0);
        Ok(())
    }

    pub fn on_testing_step_started(&mut self, world: &mut World, args: &mut StepStarted) -> Result<()> {
        self.epsilon = 0.0;
        for index in 0..world.agents.len() {
            let action = self.select(world, index, &args.state)?;
            world.agents[index].last_action = action;
            apply_action(world, index, action);
        }
        Ok(())
    }

    /// Draws, for every cell and agent, the action that agent would choose
    /// if it stood on that cell.
    pub fn on_rendered(&mut self, world: &mut World, args: &mut Rendered) -> Result<()> {
        let size = world.grid_size();
        for x in 0..size.x {
            for y in 0..size.y {
                let location = Vector2::new(x, y);
                for index in 0..world.agents.len() {
                    let at_cell = args.state.with_agent_at(index, location);
                    let action = self.select(world, index, &at_cell)?;
                    args.overlay.mark(location, index, action);
                }
            }
        }
        Ok(())
    }

    pub fn on_episode_ended(&mut self, _world: &mut World, marker: &mut EpisodeMarker) -> Result<()> {
        let finished = mem::take(&mut self.current_episode);
        info!(
            episode = marker.episode,
            steps = finished.steps(),
            final_reward = finished.final_reward().unwrap_or_default(),
            epsilon = self.epsilon,
            "episode finished"
        );
        self.episodes.push(finished);
        Ok(())
    }
}

/// Subscriptions registered by one of the `connect_*` functions.
#[derive(Debug, Default)]
pub struct Subscriptions {
    step_started: Option<SubscriptionId>,
    step_ended: Option<SubscriptionId>,
    episode_ended: Option<SubscriptionId>,
    rendered: Option<SubscriptionId>,
}

impl Subscriptions {
    pub fn disconnect(self, world: &mut World) -> Result<()> {
        if let Some(id) = self.step_started {
            world.events.step_started.disconnect(id)?;
        }
        if let Some(id) = self.step_ended {
            world.events.step_ended.disconnect(id)?;
        }
        if let Some(id) = self.episode_ended {
            world.events.episode_ended.disconnect(id)?;
        }
        if let Some(id) = self.rendered {
            world.events.rendered.disconnect(id)?;
        }
        Ok(())
    }
}

/// Learns from every step and rolls the episode log over at episode ends.
pub fn connect_training(trainer: &SharedTrainer, world: &mut World) -> Result<Subscriptions> {
    trainer.borrow().check_agents(world)?;

    let t = Rc::clone(trainer);
    let step_started = world
        .events
        .step_started
        .connect(move |world, args| t.borrow_mut().on_training_step_started(world, args));
    let t = Rc::clone(trainer);
    let step_ended = world
        .events
        .step_ended
        .connect(move |world, args| t.borrow_mut().on_training_step_ended(world, args));
    let t = Rc::clone(trainer);
    let episode_ended = world
        .events
        .episode_ended
        .connect(move |world, marker| t.borrow_mut().on_episode_ended(world, marker));

    Ok(Subscriptions {
        step_started: Some(step_started),
        step_ended: Some(step_ended),
        episode_ended: Some(episode_ended),
        rendered: None,
    })
}

/// Plays the learned policy greedily without updating it. Epsilon drops to
/// zero right away so frames drawn before the first step are greedy too.
pub fn connect_testing(trainer: &SharedTrainer, world: &mut World) -> Result<Subscriptions> {
    trainer.borrow().check_agents(world)?;
    trainer.borrow_mut().epsilon = 0.0;

    let t = Rc::clone(trainer);
    let step_started = world
        .events
        .step_started
        .connect(move |world, args| t.borrow_mut().on_testing_step_started(world, args));

    Ok(Subscriptions {
        step_started: Some(step_started),
        ..Subscriptions::default()
    })
}

/// Fills each rendered frame's overlay with policy arrows.
pub fn connect_overlay(trainer: &SharedTrainer, world: &mut World) -> Result<Subscriptions> {
    trainer.borrow().check_agents(world)?;

    let t = Rc::clone(trainer);
    let rendered = world
        .events
        .rendered
        .connect(move |world, args| t.borrow_mut().on_rendered(world, args));

    Ok(Subscriptions {
        rendered: Some(rendered),
        ..Subscriptions::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{FoodStatus, PolicyOverlay, load_world_from_string};

    fn lookups(world: &World) -> Vec<PolicyLookup> {
        world
            .agents
            .iter()
            .map(|_| PolicyLookup::new(world.grid_size(), world.food.len()))
            .collect()
    }

    #[test]
    fn rewards_follow_outcome_priority() {
        let mut world = load_world_from_string(". F N\nA # .", 0, 10, 1).unwrap();
        assert_eq!(apply_action(&mut world, 0, Action::Right), BLOCKED_REWARD);
        assert_eq!(apply_action(&mut world, 0, Action::Down), BLOCKED_REWARD);
        assert_eq!(apply_action(&mut world, 0, Action::Up), STEP_REWARD);
        assert_eq!(apply_action(&mut world, 0, Action::Right), PICKUP_REWARD);
        assert_eq!(world.food[0].status, FoodStatus::Carried);
        assert_eq!(apply_action(&mut world, 0, Action::Right), DEPOSIT_REWARD);
        assert_eq!(world.food[0].status, FoodStatus::Deposited);
        assert_eq!(apply_action(&mut world, 0, Action::Down), STEP_REWARD);
    }

    #[test]
    fn nest_without_held_food_is_a_plain_move() {
        let mut world = load_world_from_string("A N", 0, 10, 1).unwrap();
        assert_eq!(apply_action(&mut world, 0, Action::Right), STEP_REWARD);
    }

    #[test]
    fn training_rejects_mismatched_lookups() {
        let mut world = load_world_from_string("A A F N", 0, 10, 1).unwrap();
        let trainer = Trainer::new(Vec::new(), Vec::new(), 10).shared();
        assert!(matches!(
            connect_training(&trainer, &mut world),
            Err(Error::LookupCountMismatch { expected: 2, found: 0 })
        ));
    }

    #[test]
    fn training_step_updates_tables_and_log() {
        let mut world = load_world_from_string("A #\n. .", 0, 10, 4).unwrap();
        world.food.clear();
        let trainer = Trainer::new(lookups(&world), Vec::new(), 4).shared();
        connect_training(&trainer, &mut world).unwrap();

        world.step().unwrap();

        let t = trainer.borrow();
        assert_eq!(t.current_episode.steps(), 1);
        assert_eq!(t.epsilon, 0.75);
        let touched = t.lookups[0].q_values().filter(|q| *q != 0.0).count();
        assert_eq!(touched, 1);
        let reward = t.current_episode.final_reward().unwrap();
        assert!(reward == BLOCKED_REWARD || reward == STEP_REWARD);
        assert_eq!(world.agents[0].last_action, t.actions[0]);
    }

    #[test]
    fn epsilon_never_goes_negative() {
        let mut trainer = Trainer::new(Vec::new(), Vec::new(), 2);
        let mut world = load_world_from_string("A", 0, 10, 2).unwrap();
        world.agents.clear();
        let state = world.state();
        let mut args = StepEnded {
            old_state: state.clone(),
            new_state: state,
        };
        for _ in 0..5 {
            trainer.on_training_step_ended(&mut world, &mut args).unwrap();
        }
        assert_eq!(trainer.epsilon, 0.0);
        assert_eq!(trainer.current_episode.final_reward(), Some(0.0));
    }

    #[test]
    fn episode_end_rolls_log_over() {
        let mut trainer = Trainer::new(Vec::new(), Vec::new(), 2);
        let mut world = load_world_from_string("A", 0, 10, 2).unwrap();
        trainer.current_episode.record(-1.0);
        trainer
            .on_episode_ended(&mut world, &mut EpisodeMarker { episode: 0 })
            .unwrap();
        assert_eq!(trainer.episodes.len(), 1);
        assert_eq!(trainer.episodes[0].steps(), 1);
        assert_eq!(trainer.current_episode.steps(), 0);
    }

    #[test]
    fn testing_follows_greedy_policy() {
        let mut world = load_world_from_string("A . N\n. . .", 0, 10, 1).unwrap();
        world.food.clear();
        let mut tables = lookups(&world);
        let trained = world.state();
        // Make "right" the best action at the spawn cell.
        tables[0]
            .update(0, &trained, &trained, Action::Right, 100.0)
            .unwrap();
        let trainer = Trainer::new(tables, Vec::new(), 1).shared();
        connect_testing(&trainer, &mut world).unwrap();

        world.step().unwrap();
        assert_eq!(world.agents[0].location, Vector2::new(1, 0));
        assert_eq!(world.agents[0].last_action, Action::Right);
        assert_eq!(trainer.borrow().epsilon, 0.0);
    }

    #[test]
    fn overlay_marks_every_cell_without_touching_state() {
        let mut world = load_world_from_string("A .\n. N", 0, 10, 1).unwrap();
        let trainer = Trainer::new(lookups(&world), Vec::new(), 1).shared();
        trainer.borrow_mut().epsilon = 0.0;
        let subs = connect_overlay(&trainer, &mut world).unwrap();

        let state = world.state();
        let mut frame = Rendered {
            state: state.clone(),
            overlay: PolicyOverlay::new(world.grid_size()),
        };
        world.fire(|w| &mut w.events.rendered, &mut frame).unwrap();

        assert_eq!(frame.state, state);
        for x in 0..2 {
            for y in 0..2 {
                let arrows = frame.overlay.arrows_at(Vector2::new(x, y));
                assert_eq!(arrows.len(), 1);
                assert_eq!(arrows[0].action, Action::Up);
            }
        }

        subs.disconnect(&mut world).unwrap();
        assert!(world.events.rendered.is_empty());
    }
}
