//! # Generational Arena
//!
//! Append-only storage with index-based handles. Frames of the register
//! machine's environment model live here, so closures and enclosing-frame
//! links are plain `Copy` handles instead of reference-counted pointers.
//!
//! Every handle carries the generation it was allocated in. [`Arena::clear`]
//! drops all elements and bumps the generation, which makes handles from a
//! previous run fail lookup instead of silently aliasing new elements.
//!
//! ## Example
//!
//! ```
//! use regmachine_common::arena::Arena;
//!
//! let mut arena: Arena<&str> = Arena::new();
//! let first = arena.alloc("first");
//! assert_eq!(arena.get(first), Some(&"first"));
//!
//! arena.clear();
//! assert_eq!(arena.get(first), None); // stale handle
//! ```

use std::fmt;
use std::marker::PhantomData;

/// A type-safe handle into an [`Arena`].
///
/// Just an index and a generation; the `PhantomData<T>` keeps handles of
/// different arenas from being mixed up at compile time.
pub struct ArenaId<T> {
    index: usize,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

// Manual implementations to avoid requiring T: Clone/Copy/etc.
impl<T> Clone for ArenaId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArenaId<T> {}

impl<T> PartialEq for ArenaId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for ArenaId<T> {}

impl<T> std::hash::Hash for ArenaId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for ArenaId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.generation)
    }
}

impl<T> ArenaId<T> {
    /// Raw slot index, for diagnostics.
    #[must_use]
    pub fn index(self) -> usize {
        self.index
    }

    /// Generation the handle was allocated in.
    #[must_use]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Append-only arena of `T`, cleared wholesale between runs.
#[derive(Debug)]
pub struct Arena<T> {
    items: Vec<T>,
    generation: u32,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates a new empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            generation: 0,
        }
    }

    /// Allocates a new element and returns its handle.
    pub fn alloc(&mut self, value: T) -> ArenaId<T> {
        let index = self.items.len();
        self.items.push(value);
        ArenaId {
            index,
            generation: self.generation,
            _marker: PhantomData,
        }
    }

    /// Returns the element behind `id`, or `None` if the handle is stale or
    /// belongs to another arena.
    #[must_use]
    pub fn get(&self, id: ArenaId<T>) -> Option<&T> {
        if id.generation != self.generation {
            return None;
        }
        self.items.get(id.index)
    }

    /// Mutable counterpart of [`Arena::get`].
    #[must_use]
    pub fn get_mut(&mut self, id: ArenaId<T>) -> Option<&mut T> {
        if id.generation != self.generation {
            return None;
        }
        self.items.get_mut(id.index)
    }

    /// Drops every element and invalidates all outstanding handles.
    pub fn clear(&mut self) {
        self.items.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Returns the number of live elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the arena holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
