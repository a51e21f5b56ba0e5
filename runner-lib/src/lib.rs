//! Shared runner infrastructure for the emulated console.
//!
//! This crate provides window management, audio output, and input
//! handling for any system implementing the `Machine` trait.
//!
//! # Example
//!
//! ```ignore
//! use runner_lib::{run, RunnerConfig};
//!
//! fn main() {
//!     let mut machine = machine_nes::Nes::new(Default::default());
//!     machine.load_rom(&rom_data).unwrap();
//!
//!     run(machine, RunnerConfig {
//!         title: "NES".into(),
//!         scale: 3,
//!     });
//! }
//! ```

mod audio;
mod runner;

pub use runner::{run, Runner, RunnerConfig};
