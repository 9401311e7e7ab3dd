//! Path template compilation and instantiation.

pub mod path;

pub use path::{instantiate, CompiledPath};
