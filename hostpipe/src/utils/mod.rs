//! Internal data structures.
//!
//! This module exposes the generational [`Slab`] that backs the pipe
//! engine's connection table.

mod slab;

pub(crate) use slab::{Key, Slab};
