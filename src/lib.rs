//! Cancellable bulk-download sessions with real-time event fan-out.
//!
//! A [`engine::manager::SessionManager`] owns the live sessions. Each session
//! runs a [`source::traits::DownloadOperation`] on its own task; log records
//! and terminal outcomes are broadcast through an [`engine::bus::EventBus`] to
//! every connected observer.

pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod logging;
pub mod server;
pub mod source;
