use std::ops::Add;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod episode;
pub mod error;
pub mod event;
pub mod grid;
pub mod policy;
pub mod runner;
pub mod store;
pub mod trainer;
pub mod world;

pub use config::EnvParams;
pub use error::{Error, Result};

/// Represents a 2D grid coordinate.
///
/// Coordinates are signed so that a step off the edge of the grid is still
/// representable and can be rejected by a bounds check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Vector2 {
    pub x: i32,
    pub y: i32,
}

impl Vector2 {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Add for Vector2 {
    type Output = Vector2;

    fn add(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.x + rhs.x, self.y + rhs.y)
    }
}
