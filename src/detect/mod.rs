// Filesystem probing for output locations.

pub mod path;
