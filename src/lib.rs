//! Hardware-agnostic firmware core for the roller-blind motor controller.
//!
//! Kept separate from the `stm32-hal2`/RTIC glue in `main.rs` so the motion
//! state machine, quadrature decoder, speed regulator, stall supervisor,
//! and command dispatcher can run under `cargo test` against the mock
//! implementations in `bridge::mock`, without pulling in a target-specific
//! toolchain.
#![cfg_attr(not(test), no_std)]

pub mod bridge;
pub mod constants;
pub mod controller;
pub mod dispatcher;
pub mod motion;
pub mod quadrature;
pub mod regulator;
pub mod settings;
pub mod stall;
pub mod types;
