//! Packed optimizer states for data-parallel iterative training.
//!
//! Every state lives in one flat buffer of doubles split into a task state,
//! carried across iterations, and an algo state, rebuilt by each iteration.
//! Workers fold rows into private copies with `transition`, the copies are
//! combined with `merge` in any order and grouping, and `finalize` promotes
//! the combined result into the next task state.

pub mod buffer;
pub mod config;
pub mod driver;
pub mod error;
pub mod init;
pub mod layout;
pub mod linalg;
pub mod objective;
pub mod rule;
pub mod shape;
pub mod state;
pub mod variants;
pub mod view;

pub use buffer::StateBuffer;
pub use error::{Result, StateError};
pub use rule::{Metric, MetricKind, UpdateRule};
pub use state::OptimizerState;
