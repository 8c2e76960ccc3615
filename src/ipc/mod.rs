mod error;
mod handlers;
mod pump;
mod router;
mod types;

pub use pump::{complete_save, drain_notifications, next_wait, tick};
pub use router::handle_request;
pub use types::{AppState, Request, SaveDispatch, SaveDone};
