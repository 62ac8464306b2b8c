//! Drover gateway server library.
//!
//! The binary in `main.rs` is a thin clap wrapper; everything interesting
//! lives under [`serve`], which is also what the integration tests drive
//! in-process.

pub mod serve;
