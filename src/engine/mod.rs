// Engine orchestration: session lifecycle, cancellation and event fan-out.

pub mod bus;
pub mod cancel;
pub mod events;
pub mod log_adapter;
pub mod manager;
pub mod registry;
pub mod session;
