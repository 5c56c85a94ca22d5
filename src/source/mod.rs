// Download operations: the trait the engine drives and its HTTP implementation.

pub mod http_source;
pub mod progress;
pub mod traits;
