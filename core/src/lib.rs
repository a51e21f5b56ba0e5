//! Core traits shared by the emulator crates.
//!
//! The CPU crate only sees the `Bus` trait; the runner only sees the
//! `Machine` trait. This keeps the interpreter testable against a flat
//! RAM bus and keeps the frontend ignorant of emulator internals.

mod bus;
mod cpu;
mod machine;

pub use bus::Bus;
pub use cpu::{Cpu, IrqKind};
pub use machine::{AudioConfig, KeyCode, Machine, VideoConfig};
