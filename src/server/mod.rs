// HTTP surface of the engine.

pub mod handler;
