//! Runtime helpers: task creation and blocking delay.

pub mod delay;
pub mod task_pin;
