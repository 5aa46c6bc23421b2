//! # Frame-Chain Environments
//!
//! Environments are chains of frames stored in a generational [`Arena`].
//! An environment value is just the handle of its innermost frame
//! ([`EnvId`]), so many closures can share one frame and a frame can be
//! referenced from registers, the stack and other frames at once.
//!
//! Unlike a persistent environment, frames here are mutated in place:
//! `define` writes into the innermost frame of the environment it is given
//! and every closure holding that frame observes the new binding. That is
//! what makes mutually recursive top-level functions work.
//!
//! ## Example
//!
//! ```
//! use regmachine_common::environment::Frames;
//!
//! let mut frames: Frames<i64> = Frames::new();
//! let global = frames.make_top();
//! frames.define(global, "x", 10).unwrap();
//!
//! let local = frames.extend([("y", 20)], global).unwrap();
//! assert_eq!(frames.lookup(local, "x").unwrap(), Some(&10)); // from parent
//! assert_eq!(frames.lookup(global, "y").unwrap(), None);     // not visible outward
//! ```

use std::sync::Arc;

use im::HashMap as ImHashMap;
use thiserror::Error;

use crate::arena::{Arena, ArenaId};

/// Handle of an environment: the id of its innermost frame.
pub type EnvId<V> = ArenaId<Frame<V>>;

/// A single scope: bindings plus a link to the enclosing frame.
#[derive(Debug)]
pub struct Frame<V> {
    bindings: ImHashMap<Arc<str>, V>,
    enclosing: Option<EnvId<V>>,
}

impl<V: Clone> Frame<V> {
    /// Bindings of this frame only.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &V)> {
        self.bindings.iter()
    }

    /// Frame this one is chained to, if any.
    #[must_use]
    pub fn enclosing(&self) -> Option<EnvId<V>> {
        self.enclosing
    }
}

/// An environment handle did not resolve: it came from another store or
/// from before the last [`Frames::clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("environment handle does not belong to this machine run")]
pub struct StaleEnvironment;

/// Store owning every frame created during a machine run.
///
/// Frames are never collected individually: a frame allocated by `extend`
/// lives until [`Frames::clear`], even once nothing refers to it. A long
/// tail-recursive loop therefore runs in constant stack space but its frame
/// count grows by one per call.
#[derive(Debug)]
pub struct Frames<V> {
    arena: Arena<Frame<V>>,
}

impl<V: Clone> Default for Frames<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Frames<V> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
        }
    }

    /// Number of frames allocated so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Returns true if no frame has been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Drops every frame. Existing handles become stale.
    pub fn clear(&mut self) {
        self.arena.clear();
    }

    /// Borrow a frame by handle.
    pub fn frame(&self, env: EnvId<V>) -> Result<&Frame<V>, StaleEnvironment> {
        self.arena.get(env).ok_or(StaleEnvironment)
    }

    /// A new environment with one empty frame and nothing enclosing it.
    pub fn make_top(&mut self) -> EnvId<V> {
        self.arena.alloc(Frame {
            bindings: ImHashMap::new(),
            enclosing: None,
        })
    }

    /// A new environment whose innermost frame holds `bindings`, chained to
    /// `base`.
    pub fn extend<K>(
        &mut self,
        bindings: impl IntoIterator<Item = (K, V)>,
        base: EnvId<V>,
    ) -> Result<EnvId<V>, StaleEnvironment>
    where
        K: Into<Arc<str>>,
    {
        self.frame(base)?;
        let bindings = bindings
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .collect();
        Ok(self.arena.alloc(Frame {
            bindings,
            enclosing: Some(base),
        }))
    }

    /// A new environment with one empty frame chained to `base`.
    pub fn extend_empty(&mut self, base: EnvId<V>) -> Result<EnvId<V>, StaleEnvironment> {
        self.extend(std::iter::empty::<(Arc<str>, V)>(), base)
    }

    /// Binds `name` in the innermost frame of `env`, replacing any binding
    /// of the same name in that frame. Enclosing frames are never touched.
    pub fn define(
        &mut self,
        env: EnvId<V>,
        name: impl Into<Arc<str>>,
        value: V,
    ) -> Result<(), StaleEnvironment> {
        let frame = self.arena.get_mut(env).ok_or(StaleEnvironment)?;
        frame.bindings.insert(name.into(), value);
        Ok(())
    }

    /// Walks the chain outward from `env` and returns the first binding of
    /// `name`, or `None` once the chain is exhausted.
    pub fn lookup(&self, env: EnvId<V>, name: &str) -> Result<Option<&V>, StaleEnvironment> {
        let mut current = Some(env);
        while let Some(id) = current {
            let frame = self.frame(id)?;
            if let Some(value) = frame.bindings.get(name) {
                return Ok(Some(value));
            }
            current = frame.enclosing;
        }
        Ok(None)
    }

    /// Checks if a name is bound in the innermost frame only.
    pub fn is_bound_locally(&self, env: EnvId<V>, name: &str) -> Result<bool, StaleEnvironment> {
        Ok(self.frame(env)?.bindings.contains_key(name))
    }

    /// Every binding visible from `env`; inner frames shadow outer ones.
    pub fn bindings(&self, env: EnvId<V>) -> Result<ImHashMap<Arc<str>, V>, StaleEnvironment> {
        let frame = self.frame(env)?;
        let mut result = match frame.enclosing {
            Some(parent) => self.bindings(parent)?,
            None => ImHashMap::new(),
        };
        for (name, value) in &frame.bindings {
            result.insert(name.clone(), value.clone());
        }
        Ok(result)
    }

    /// Number of frames in the chain starting at `env`.
    pub fn depth(&self, env: EnvId<V>) -> Result<usize, StaleEnvironment> {
        let mut depth = 0;
        let mut current = Some(env);
        while let Some(id) = current {
            depth += 1;
            current = self.frame(id)?.enclosing;
        }
        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_top_environment() {
        let mut frames: Frames<i64> = Frames::new();
        let top = frames.make_top();
        assert_eq!(frames.lookup(top, "x"), Ok(None));
        assert_eq!(frames.depth(top), Ok(1));
        assert!(frames.frame(top).unwrap().enclosing().is_none());
    }

    #[test]
    fn test_define_and_lookup() {
        let mut frames = Frames::new();
        let env = frames.make_top();
        frames.define(env, "x", 10).unwrap();
        frames.define(env, "y", 20).unwrap();

        assert_eq!(frames.lookup(env, "x"), Ok(Some(&10)));
        assert_eq!(frames.lookup(env, "y"), Ok(Some(&20)));
        assert_eq!(frames.lookup(env, "z"), Ok(None));
    }

    #[test]
    fn test_define_overwrites_innermost_only() {
        let mut frames = Frames::new();
        let outer = frames.make_top();
        frames.define(outer, "x", 1).unwrap();
        let inner = frames.extend_empty(outer).unwrap();

        frames.define(inner, "x", 2).unwrap();
        frames.define(inner, "x", 3).unwrap();

        assert_eq!(frames.lookup(inner, "x"), Ok(Some(&3)));
        assert_eq!(frames.lookup(outer, "x"), Ok(Some(&1)));
    }

    #[test]
    fn test_shadowing() {
        let mut frames = Frames::new();
        let outer = frames.make_top();
        frames.define(outer, "x", 10).unwrap();
        let inner = frames.extend([("x", 20)], outer).unwrap();

        assert_eq!(frames.lookup(inner, "x"), Ok(Some(&20)));
        assert_eq!(frames.lookup(outer, "x"), Ok(Some(&10)));
    }

    #[test]
    fn test_shared_frame_sees_later_definitions() {
        let mut frames = Frames::new();
        let global = frames.make_top();
        let closure_env = frames.extend([("a", 1)], global).unwrap();

        // defined after the closure captured `global`
        frames.define(global, "late", 99).unwrap();
        assert_eq!(frames.lookup(closure_env, "late"), Ok(Some(&99)));
    }

    #[test]
    fn test_bindings_and_depth() {
        let mut frames = Frames::new();
        let env = frames.make_top();
        frames.define(env, "x", 1).unwrap();
        let child = frames.extend([("y", 2), ("x", 3)], env).unwrap();

        let all = frames.bindings(child).unwrap();
        assert_eq!(all.get("x"), Some(&3));
        assert_eq!(all.get("y"), Some(&2));
        assert_eq!(frames.depth(child), Ok(2));
        assert_eq!(frames.is_bound_locally(child, "y"), Ok(true));
        assert_eq!(frames.is_bound_locally(env, "y"), Ok(false));
    }

    #[test]
    fn test_stale_handle_after_clear() {
        let mut frames: Frames<i64> = Frames::new();
        let env = frames.make_top();
        frames.clear();
        assert_eq!(frames.lookup(env, "x"), Err(StaleEnvironment));
        assert_eq!(frames.define(env, "x", 1), Err(StaleEnvironment));
        assert_eq!(frames.extend_empty(env), Err(StaleEnvironment));
        assert_eq!(
            StaleEnvironment.to_string(),
            "environment handle does not belong to this machine run"
        );
    }

    #[test]
    fn test_frames_live_until_clear() {
        let mut frames: Frames<i64> = Frames::new();
        let top = frames.make_top();
        for i in 0..100 {
            // each call frame is dropped by the caller immediately
            frames.extend([("n", i)], top).unwrap();
        }
        assert_eq!(frames.len(), 101);
        frames.clear();
        assert!(frames.is_empty());
    }
}
