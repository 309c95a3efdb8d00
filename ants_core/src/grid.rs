use serde::{Deserialize, Serialize};

use crate::Vector2;

/// A stack of equally sized 2D layers stored in one contiguous vector.
///
/// Cells are laid out layer by layer, each layer in row-major order, so the
/// flat index of `(layer, x, y)` is `(layer * height + y) * width + x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayeredGrid<T> {
    width: usize,
    height: usize,
    layers: usize,
    cells: Vec<T>,
}

impl<T> LayeredGrid<T> {
    /// Creates a new grid filled with default values.
    ///
    /// # Panics
    ///
    /// Panics if `layers * width * height` overflows `usize`.
    pub fn new(layers: usize, width: usize, height: usize) -> Self
    where
        T: Default + Clone,
    {
        let size = layers
            .checked_mul(width)
            .and_then(|n| n.checked_mul(height))
            .expect("Grid size overflow");
        LayeredGrid {
            width,
            height,
            layers,
            cells: vec![T::default(); size],
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Converts `(layer, x, y)` to a flat vector index.
    ///
    /// Returns `None` if any coordinate is out of range.
    #[inline]
    pub fn coords_to_index(&self, layer: usize, x: usize, y: usize) -> Option<usize> {
        if self.is_valid(layer, x, y) {
            Some((layer * self.height + y) * self.width + x)
        } else {
            None
        }
    }

    /// Like [`coords_to_index`](Self::coords_to_index) for a signed grid location.
    #[inline]
    pub fn location_to_index(&self, layer: usize, location: Vector2) -> Option<usize> {
        let x = usize::try_from(location.x).ok()?;
        let y = usize::try_from(location.y).ok()?;
        self.coords_to_index(layer, x, y)
    }

    #[inline]
    pub fn is_valid(&self, layer: usize, x: usize, y: usize) -> bool {
        layer < self.layers && x < self.width && y < self.height
    }

    pub fn get(&self, layer: usize, location: Vector2) -> Option<&T> {
        let index = self.location_to_index(layer, location)?;
        self.cells.get(index)
    }

    pub fn get_mut(&mut self, layer: usize, location: Vector2) -> Option<&mut T> {
        let index = self.location_to_index(layer, location)?;
        self.cells.get_mut(index)
    }

    /// Returns an iterator over every cell of every layer in storage order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.cells.iter()
    }
}
