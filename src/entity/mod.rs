//! SeaORM entity definitions for the scheduler database.

pub mod device;
pub mod job;
