//! Helpers shared by the primebuf demo programs.
pub mod framegen;
