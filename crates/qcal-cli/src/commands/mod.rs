//! CLI command implementations.

pub mod common;
pub mod conflicts;
pub mod cr_schedule;
pub mod one_qubit;
pub mod record;
