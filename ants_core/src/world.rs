use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    EnvParams, Error, Result, Vector2,
    event::{Event, fire_within},
    grid::LayeredGrid,
};

/// Number of distinct agent actions.
pub const ACTION_COUNT: usize = 4;

/// Represents the moves an agent can take. The discriminant is the action
/// index used by the policy tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Action {
    #[default]
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
}

impl Action {
    pub const ALL: [Action; ACTION_COUNT] = [Action::Up, Action::Down, Action::Left, Action::Right];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Action> {
        Self::ALL.get(index).copied()
    }

    /// Grid offset of one step in this direction. `Y` grows downward.
    pub fn delta(self) -> Vector2 {
        match self {
            Action::Up => Vector2::new(0, -1),
            Action::Down => Vector2::new(0, 1),
            Action::Left => Vector2::new(-1, 0),
            Action::Right => Vector2::new(1, 0),
        }
    }

    /// Counter-clockwise sprite rotation for an agent facing this way.
    pub fn rotation_degrees(self) -> i32 {
        match self {
            Action::Up => 0,
            Action::Down => 180,
            Action::Left => 90,
            Action::Right => -90,
        }
    }

    /// Single-character arrow used when drawing headings and policies.
    pub fn glyph(self) -> char {
        match self {
            Action::Up => '^',
            Action::Down => 'v',
            Action::Left => '<',
            Action::Right => '>',
        }
    }
}

/// Lifecycle of a food item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoodStatus {
    Dropped,
    Carried,
    Deposited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Food {
    pub location: Vector2,
    pub status: FoodStatus,
    pub spawn_location: Vector2,
}

/// RGB colour assigned to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl AgentColor {
    /// Colour for the agent at `index`: hue `360 / (index + 1)` at full
    /// saturation and half lightness.
    pub fn for_index(index: usize) -> Self {
        let hue = (360.0 / (index as f64 + 1.0)) % 360.0;
        let sector = hue / 60.0;
        let x = 1.0 - (sector % 2.0 - 1.0).abs();
        let (r, g, b) = match sector as u32 {
            0 => (1.0, x, 0.0),
            1 => (x, 1.0, 0.0),
            2 => (0.0, 1.0, x),
            3 => (0.0, x, 1.0),
            4 => (x, 0.0, 1.0),
            _ => (1.0, 0.0, x),
        };
        let channel = |v: f64| (v * 255.0).round() as u8;
        AgentColor {
            r: channel(r),
            g: channel(g),
            b: channel(b),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub location: Vector2,
    /// Indices into [`World::food`] of the items being carried.
    pub food: Vec<usize>,
    pub last_action: Action,
    pub spawn_location: Vector2,
    pub capacity: usize,
    pub color: AgentColor,
}

impl Agent {
    fn spawn(index: usize, location: Vector2) -> Self {
        Agent {
            location,
            food: Vec::new(),
            last_action: Action::Up,
            spawn_location: location,
            capacity: 1,
            color: AgentColor::for_index(index),
        }
    }
}

/// A static cell: obstacles block movement, nests accept deposits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixture {
    pub location: Vector2,
    pub spawn_location: Vector2,
}

impl Fixture {
    fn spawn(location: Vector2) -> Self {
        Fixture {
            location,
            spawn_location: location,
        }
    }
}

pub type Obstacle = Fixture;
pub type Nest = Fixture;

/// Observation derived from the world on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvState {
    pub agent_locations: Vec<Vector2>,
    pub carrying_food: Vec<bool>,
    pub food_deposited: usize,
}

impl EnvState {
    /// Copy of this state with agent `index` moved to `location`.
    pub fn with_agent_at(&self, index: usize, location: Vector2) -> EnvState {
        let mut state = self.clone();
        state.agent_locations[index] = location;
        state
    }
}

#[derive(Debug, Clone)]
pub struct StepStarted {
    pub state: EnvState,
}

#[derive(Debug, Clone)]
pub struct StepEnded {
    pub old_state: EnvState,
    pub new_state: EnvState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeMarker {
    pub episode: u64,
}

/// One policy arrow drawn on a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrow {
    pub agent: usize,
    pub action: Action,
}

/// Per-cell arrows that render subscribers draw for the front end.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOverlay {
    arrows: LayeredGrid<Vec<Arrow>>,
}

impl PolicyOverlay {
    pub fn new(grid_size: Vector2) -> Self {
        let width = usize::try_from(grid_size.x).unwrap_or(0);
        let height = usize::try_from(grid_size.y).unwrap_or(0);
        PolicyOverlay {
            arrows: LayeredGrid::new(1, width, height),
        }
    }

    /// Adds an arrow to a cell. Locations outside the grid are ignored.
    pub fn mark(&mut self, location: Vector2, agent: usize, action: Action) {
        if let Some(cell) = self.arrows.get_mut(0, location) {
            cell.push(Arrow { agent, action });
        }
    }

    pub fn arrows_at(&self, location: Vector2) -> &[Arrow] {
        self.arrows
            .get(0, location)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.arrows.iter().all(Vec::is_empty)
    }
}

/// Payload of the `rendered` event.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub state: EnvState,
    pub overlay: PolicyOverlay,
}

/// Lifecycle events exposed by the world.
#[derive(Debug, Default)]
pub struct WorldEvents {
    pub reset: Event<World, ()>,
    pub step_started: Event<World, StepStarted>,
    pub step_ended: Event<World, StepEnded>,
    pub all_food_deposited: Event<World, ()>,
    pub max_step_reached: Event<World, ()>,
    pub rendered: Event<World, Rendered>,
    pub episode_started: Event<World, EpisodeMarker>,
    pub episode_ended: Event<World, EpisodeMarker>,
}

/// Grid world of agents carrying food to nests.
#[derive(Debug)]
pub struct World {
    pub agents: Vec<Agent>,
    pub food: Vec<Food>,
    pub obstacles: Vec<Obstacle>,
    pub nests: Vec<Nest>,
    pub events: WorldEvents,
    grid_size: Vector2,
    rng: StdRng,
    current_step: u64,
    max_steps: u64,
    episode_count: u64,
    running: bool,
    render_step: bool,
}

impl World {
    fn empty(grid_size: Vector2, seed: u64, max_steps: u64, episode_count: u64) -> Self {
        World {
            agents: Vec::new(),
            food: Vec::new(),
            obstacles: Vec::new(),
            nests: Vec::new(),
            events: WorldEvents::default(),
            grid_size,
            rng: StdRng::seed_from_u64(seed),
            current_step: 0,
            max_steps,
            episode_count,
            running: false,
            render_step: true,
        }
    }

    /// Creates a world and places every entity on a distinct random cell.
    ///
    /// Entities are placed in the order agents, obstacles, nests, food, each
    /// through [`get_empty_location`](Self::get_empty_location). Fails with
    /// `Error::GridFull` rather than stacking entities when the grid runs out.
    pub fn new(params: &EnvParams) -> Result<Self> {
        params.validate()?;
        let mut world = World::empty(
            params.grid_size,
            params.seed,
            params.max_steps,
            params.episode_count,
        );

        for index in 0..params.agent_count {
            let location = world.place("agent")?;
            world.agents.push(Agent::spawn(index, location));
        }
        for _ in 0..params.obstacle_count {
            let location = world.place("obstacle")?;
            world.obstacles.push(Fixture::spawn(location));
        }
        for _ in 0..params.nest_count {
            let location = world.place("nest")?;
            world.nests.push(Fixture::spawn(location));
        }
        for _ in 0..params.food_count {
            let location = world.place("food")?;
            world.food.push(Food {
                location,
                status: FoodStatus::Dropped,
                spawn_location: location,
            });
        }

        info!(
            agents = world.agents.len(),
            food = world.food.len(),
            obstacles = world.obstacles.len(),
            nests = world.nests.len(),
            width = world.grid_size.x,
            height = world.grid_size.y,
            "world initialized"
        );
        Ok(world)
    }

    fn place(&mut self, entity: &'static str) -> Result<Vector2> {
        self.get_empty_location().ok_or(Error::GridFull {
            width: self.grid_size.x,
            height: self.grid_size.y,
            entity,
        })
    }

    /// Checks that no agent, obstacle, nest or food sits on `location`.
    pub fn is_location_empty(&self, location: Vector2) -> bool {
        self.agents.iter().all(|a| a.location != location)
            && self.obstacles.iter().all(|o| o.location != location)
            && self.nests.iter().all(|n| n.location != location)
            && self.food.iter().all(|f| f.location != location)
    }

    /// Draws one random cell and returns it if free, otherwise scans columns
    /// from `x = 0`, each from `y = 0`, and returns the first free cell.
    pub fn get_empty_location(&mut self) -> Option<Vector2> {
        if self.grid_size.x <= 0 || self.grid_size.y <= 0 {
            return None;
        }
        let candidate = Vector2::new(
            self.rng.random_range(0..self.grid_size.x),
            self.rng.random_range(0..self.grid_size.y),
        );
        if self.is_location_empty(candidate) {
            return Some(candidate);
        }

        (0..self.grid_size.x)
            .flat_map(|x| (0..self.grid_size.y).map(move |y| Vector2::new(x, y)))
            .find(|location| self.is_location_empty(*location))
    }

    pub fn grid_size(&self) -> Vector2 {
        self.grid_size
    }

    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    pub fn max_steps(&self) -> u64 {
        self.max_steps
    }

    pub fn episode_count(&self) -> u64 {
        self.episode_count
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn render_step(&self) -> bool {
        self.render_step
    }

    pub fn set_render_step(&mut self, render_step: bool) {
        self.render_step = render_step;
    }

    /// The shared random stream used for placement and action selection.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn out_of_bounds(&self, location: Vector2) -> bool {
        location.x < 0
            || location.x >= self.grid_size.x
            || location.y < 0
            || location.y >= self.grid_size.y
    }

    pub fn inside_obstacle(&self, location: Vector2) -> bool {
        self.obstacles.iter().any(|o| o.location == location)
    }

    /// Moves the agent one cell unless that leaves the grid or enters an
    /// obstacle. Other agents do not block movement.
    ///
    /// # Panics
    ///
    /// Panics if `agent` is not a valid agent index.
    pub fn try_move_agent(&mut self, agent: usize, action: Action) -> bool {
        let candidate = self.agents[agent].location + action.delta();
        if self.out_of_bounds(candidate) || self.inside_obstacle(candidate) {
            return false;
        }
        self.agents[agent].location = candidate;
        true
    }

    pub fn at_capacity(&self, agent: usize) -> bool {
        let agent = &self.agents[agent];
        agent.food.len() >= agent.capacity
    }

    pub fn can_pickup(&self, agent: usize, food: usize) -> bool {
        !self.at_capacity(agent) && self.food[food].status == FoodStatus::Dropped
    }

    /// Hands `food` to `agent` if it can pick it up.
    pub fn give_food(&mut self, agent: usize, food: usize) -> bool {
        if !self.can_pickup(agent, food) {
            return false;
        }
        self.food[food].status = FoodStatus::Carried;
        self.agents[agent].food.push(food);
        true
    }

    /// First dropped food on `location`, in food list order.
    pub fn on_dropped_food(&self, location: Vector2) -> Option<usize> {
        self.food
            .iter()
            .position(|f| f.location == location && f.status == FoodStatus::Dropped)
    }

    pub fn on_nest(&self, location: Vector2) -> Option<usize> {
        self.nests.iter().position(|n| n.location == location)
    }

    pub fn can_deposit(&self, agent: usize, food: usize) -> bool {
        let carrier = &self.agents[agent];
        carrier.food.contains(&food) && self.on_nest(carrier.location).is_some()
    }

    pub fn deposit(&mut self, agent: usize, food: usize) -> bool {
        if !self.can_deposit(agent, food) {
            return false;
        }
        self.food[food].status = FoodStatus::Deposited;
        self.agents[agent].food.retain(|held| *held != food);
        true
    }

    /// Episode termination: every food item is deposited. Vacuously true
    /// for a world without food.
    pub fn all_deposited(&self) -> bool {
        self.food.iter().all(|f| f.status == FoodStatus::Deposited)
    }

    pub fn update_carried_food_locations(&mut self) {
        for agent in &self.agents {
            for &food in &agent.food {
                self.food[food].location = agent.location;
            }
        }
    }

    pub fn state(&self) -> EnvState {
        EnvState {
            agent_locations: self.agents.iter().map(|a| a.location).collect(),
            carrying_food: self.agents.iter().map(|a| !a.food.is_empty()).collect(),
            food_deposited: self
                .food
                .iter()
                .filter(|f| f.status == FoodStatus::Deposited)
                .count(),
        }
    }

    /// Fires one of this world's own events.
    pub fn fire<P>(&mut self, slot: fn(&mut World) -> &mut Event<World, P>, payload: &mut P) -> Result<()> {
        fire_within(self, slot, payload)
    }

    /// Advances the world by one tick.
    ///
    /// `step_started` subscribers choose and apply actions, then carried food
    /// follows its carrier, termination events fire, and `step_ended`
    /// subscribers receive the before and after observations.
    pub fn step(&mut self) -> Result<()> {
        let mut started = StepStarted { state: self.state() };
        self.fire(|w| &mut w.events.step_started, &mut started)?;

        self.update_carried_food_locations();
        if self.all_deposited() {
            debug!(step = self.current_step, "all food deposited");
            self.fire(|w| &mut w.events.all_food_deposited, &mut ())?;
        }

        self.current_step += 1;
        if self.current_step >= self.max_steps {
            debug!(step = self.current_step, "max steps reached");
            self.fire(|w| &mut w.events.max_step_reached, &mut ())?;
        }

        let mut ended = StepEnded {
            old_state: started.state,
            new_state: self.state(),
        };
        self.fire(|w| &mut w.events.step_ended, &mut ended)
    }

    /// Returns every entity to its spawn cell and all food to `Dropped`.
    pub fn reset(&mut self) -> Result<()> {
        self.current_step = 0;
        for agent in &mut self.agents {
            agent.location = agent.spawn_location;
            agent.food.clear();
        }
        for fixture in self.obstacles.iter_mut().chain(self.nests.iter_mut()) {
            fixture.location = fixture.spawn_location;
        }
        for food in &mut self.food {
            food.location = food.spawn_location;
            food.status = FoodStatus::Dropped;
        }
        debug!("world reset");
        self.fire(|w| &mut w.events.reset, &mut ())
    }
}

/// Builds a world from a whitespace-separated map string.
///
/// Each line is a row and `Y` grows downward. Tokens: `.` empty, `#`
/// obstacle, `N` nest, `A` agent, `F` dropped food, `AF` agent on food,
/// `NF` nest with food on it. Agents are numbered in reading order.
pub fn load_world_from_string(
    map_string: &str,
    seed: u64,
    max_steps: u64,
    episode_count: u64,
) -> Result<World> {
    let lines: Vec<&str> = map_string.trim().lines().collect();
    if lines.is_empty() {
        return Err(Error::InvalidMap("map string is empty".to_string()));
    }

    let mut width = 0;
    let mut rows: Vec<Vec<&str>> = Vec::with_capacity(lines.len());
    for (y, line) in lines.iter().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if y == 0 {
            width = tokens.len();
            if width == 0 {
                return Err(Error::InvalidMap("map has zero width".to_string()));
            }
        } else if tokens.len() != width {
            return Err(Error::InvalidMap(format!(
                "inconsistent width at row {}: expected {}, found {}",
                y,
                width,
                tokens.len()
            )));
        }
        rows.push(tokens);
    }

    let to_coord = |value: usize| {
        i32::try_from(value).map_err(|_| Error::InvalidMap("map is too large".to_string()))
    };
    let grid_size = Vector2::new(to_coord(width)?, to_coord(rows.len())?);
    let mut world = World::empty(grid_size, seed, max_steps, episode_count);

    for (y, tokens) in rows.iter().enumerate() {
        for (x, token) in tokens.iter().enumerate() {
            let location = Vector2::new(to_coord(x)?, to_coord(y)?);
            let (agent, fixture, food) = match *token {
                "." => (false, None, false),
                "#" => (false, Some(true), false),
                "N" => (false, Some(false), false),
                "NF" => (false, Some(false), true),
                "A" => (true, None, false),
                "AF" => (true, None, true),
                "F" => (false, None, true),
                unknown => {
                    return Err(Error::InvalidMap(format!(
                        "unknown map code '{}' at position ({}, {})",
                        unknown, x, y
                    )));
                }
            };

            if agent {
                let index = world.agents.len();
                world.agents.push(Agent::spawn(index, location));
            }
            match fixture {
                Some(true) => world.obstacles.push(Fixture::spawn(location)),
                Some(false) => world.nests.push(Fixture::spawn(location)),
                None => {}
            }
            if food {
                world.food.push(Food {
                    location,
                    status: FoodStatus::Dropped,
                    spawn_location: location,
                });
            }
        }
    }

    Ok(world)
}
