//! # Register Machine Common Utilities
//!
//! Storage shared by the register machine and its tooling:
//!
//! - [`arena`]: generational arena with `Copy` handles
//! - [`environment`]: frame-chain environments stored in an arena
//!
//! Frames reference their enclosing frame by handle, so shared and cyclic
//! structure (closures capturing the frame they are defined in) needs no
//! `Rc<RefCell<T>>`.

pub mod arena;
pub mod environment;

pub use arena::{Arena, ArenaId};
pub use environment::{EnvId, Frame, Frames, StaleEnvironment};
