//! Command surface - the calls the dashboard UI makes into the engine
//!
//! Every command takes the shared [`AppContext`](crate::context::AppContext),
//! returns a serializable result and logs its outcome.

mod dead_letters;
mod mutations;
mod views;

pub use dead_letters::*;
pub use mutations::*;
pub use views::*;
