//! Rotation runs: run lock, state machine and the controller driving them.

pub mod controller;
pub mod lock;
pub mod state;

pub use controller::{RotationController, RunClock, RunReport};
pub use lock::{LockInfo, RunLock};
pub use state::RunState;
