//! Lifecycle coordination.
//!
//! # Lifecycle phases
//!
//! ```text
//! 1. Module Registration (descriptors only)
//!    ↓
//! 2. Plan Build (topological order over requires/provides)
//!    ↓
//! 3. Constructing (constructors, plan order)
//!    ↓
//! 4. Starting (on_start hooks, plan order)
//!    ↓
//! 5. Listener Bound
//!    ↓
//! 6. Ready (on_ready hooks, plan order; hosted tasks begin)
//!    ↓
//! [Running...]
//!    ↓
//! 7. Shutdown Signal (SIGTERM/SIGINT or programmatic trigger)
//!    ↓
//! 8. ShuttingDown (tasks cancelled; on_shutdown hooks, reverse plan order)
//!    ↓
//! 9. Stopped
//! ```
//!
//! A failure during Constructing or Starting lands in the absorbing `Failed`
//! phase after rolling back: every module whose start succeeded gets its
//! shutdown hook exactly once, in reverse order.

mod application;
mod coordinator;
mod error;
mod shutdown;

pub use application::{Application, ApplicationBuilder, BootError};
pub use coordinator::{LifecycleCoordinator, LifecyclePhase};
pub use error::LifecycleError;
pub use shutdown::{ShutdownSignal, os_signal};
