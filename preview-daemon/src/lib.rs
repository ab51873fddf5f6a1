//! preview-bot daemon: webhook server, build cycle worker and child reaper.

pub mod dispatch;
mod error;
pub mod http;
mod runtime;

pub use dispatch::{CycleRequest, Dispatcher, Enqueued};
pub use error::DaemonError;
pub use http::{build_router, AppState, HttpError};
pub use runtime::{init_tracing, run, start_blocking};
