//! Monitored executable launch.
//!
//! [`environment`] describes the variables that route the executable's
//! logger into the pipe; [`spawner`] starts the executable with them and
//! watches for its exit.

pub mod environment;
pub mod spawner;

pub use environment::ChildEnvironment;
pub use spawner::{monitor_exit, spawn_monitored, LaunchConfig};
