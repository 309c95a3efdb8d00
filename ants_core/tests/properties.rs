//! Property-based tests for placement, movement, reset and learning.

use std::collections::HashSet;

use proptest::prelude::*;

use ants_core::{
    EnvParams, Vector2,
    policy::{DISCOUNT_FACTOR, LEARNING_RATE, PolicyLookup},
    trainer::apply_action,
    world::{Action, EnvState, FoodStatus, World},
};

/// Parameters whose entities always fit on the grid.
fn fitting_params() -> impl Strategy<Value = EnvParams> {
    (1i32..8, 1i32..8, any::<u64>())
        .prop_flat_map(|(w, h, seed)| {
            let cells = (w * h) as usize;
            (Just((w, h, seed)), proptest::array::uniform4(0..=cells))
        })
        .prop_map(|((w, h, seed), draws)| {
            // Each count takes a share of the cells still free.
            let mut free = (w * h) as usize;
            let mut counts = [0usize; 4];
            for (count, draw) in counts.iter_mut().zip(draws) {
                *count = draw % (free + 1);
                free -= *count;
            }
            let [agents, food, obstacles, nests] = counts;
            EnvParams {
                agent_count: agents,
                food_count: food,
                obstacle_count: obstacles,
                nest_count: nests,
                grid_size: Vector2::new(w, h),
                seed,
                max_steps: 100,
                episode_count: 10,
            }
        })
}

fn action() -> impl Strategy<Value = Action> {
    (0usize..4).prop_map(|i| Action::ALL[i])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Initialization never stacks two entities on one cell.
    #[test]
    fn prop_placement_never_overlaps(params in fitting_params()) {
        let world = World::new(&params).unwrap();
        let cells: Vec<Vector2> = world.agents.iter().map(|a| a.location)
            .chain(world.obstacles.iter().map(|o| o.location))
            .chain(world.nests.iter().map(|n| n.location))
            .chain(world.food.iter().map(|f| f.location))
            .collect();
        let unique: HashSet<Vector2> = cells.iter().copied().collect();
        prop_assert_eq!(unique.len(), cells.len());
        prop_assert_eq!(cells.len(), params.entity_count());
        for cell in cells {
            prop_assert!(!world.out_of_bounds(cell));
        }
    }

    /// A blocked move stays blocked no matter how often it is tried.
    #[test]
    fn prop_blocked_moves_are_idempotent(params in fitting_params(), tries in 1usize..10) {
        let mut world = World::new(&params).unwrap();
        for agent in 0..world.agents.len() {
            for action in Action::ALL {
                let start = world.agents[agent].location;
                let target = start + action.delta();
                if world.out_of_bounds(target) || world.inside_obstacle(target) {
                    for _ in 0..tries {
                        prop_assert!(!world.try_move_agent(agent, action));
                        prop_assert_eq!(world.agents[agent].location, start);
                    }
                }
            }
        }
    }

    /// Reset undoes any sequence of moves, pickups and deposits.
    #[test]
    fn prop_reset_restores_spawns(
        params in fitting_params(),
        moves in proptest::collection::vec(action(), 0..60),
    ) {
        let mut world = World::new(&params).unwrap();
        let agents = world.agents.len();
        for (i, action) in moves.into_iter().enumerate() {
            if agents > 0 {
                apply_action(&mut world, i % agents, action);
                world.update_carried_food_locations();
            }
        }
        world.step().unwrap();

        world.reset().unwrap();
        prop_assert_eq!(world.current_step(), 0);
        for agent in &world.agents {
            prop_assert_eq!(agent.location, agent.spawn_location);
            prop_assert!(agent.food.is_empty());
        }
        for fixture in world.obstacles.iter().chain(&world.nests) {
            prop_assert_eq!(fixture.location, fixture.spawn_location);
        }
        for food in &world.food {
            prop_assert_eq!(food.location, food.spawn_location);
            prop_assert_eq!(food.status, FoodStatus::Dropped);
        }
    }

    /// The TD update changes exactly one Q-value, by the textbook formula.
    #[test]
    fn prop_q_update_is_exact(
        old_q in proptest::array::uniform4(-1000.0f64..1000.0),
        new_q in proptest::array::uniform4(-1000.0f64..1000.0),
        action in action(),
        reward in -1000.0f64..1000.0,
    ) {
        let mut lookup = PolicyLookup::new(Vector2::new(2, 1), 0);
        let old = EnvState {
            agent_locations: vec![Vector2::new(0, 0)],
            carrying_food: vec![false],
            food_deposited: 0,
        };
        let new = old.with_agent_at(0, Vector2::new(1, 0));

        seed_cell(&mut lookup, &old, old_q);
        seed_cell(&mut lookup, &new, new_q);
        let before = lookup.policy(0, &old).unwrap().q_values;
        let next = lookup.policy(0, &new).unwrap().q_values;
        let m = next.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        lookup.update(0, &old, &new, action, reward).unwrap();

        let after = lookup.policy(0, &old).unwrap().q_values;
        let a = action.index();
        let q_a = before[a];
        prop_assert_eq!(after[a], q_a + LEARNING_RATE * (reward + DISCOUNT_FACTOR * m - q_a));
        for i in 0..4 {
            if i != a {
                prop_assert_eq!(after[i].to_bits(), before[i].to_bits());
            }
        }
        prop_assert_eq!(lookup.policy(0, &new).unwrap().q_values, next);
    }
}

/// Fills a zero cell with arbitrary finite values via self-looping updates.
fn seed_cell(lookup: &mut PolicyLookup, state: &EnvState, target: [f64; 4]) {
    for (i, value) in target.iter().enumerate() {
        lookup
            .update(0, state, state, Action::ALL[i], *value)
            .unwrap();
    }
}
