#![cfg_attr(not(test), no_std)]

pub mod buttons;
pub mod clock;
pub mod config;
pub mod desk;
pub mod diagnostics;
pub mod ranging;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;
