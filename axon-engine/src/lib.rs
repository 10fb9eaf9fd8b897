#![doc = include_str!("../README.md")]

pub mod engine;
pub mod error;
pub mod local;

pub use engine::*;
pub use error::*;
pub use local::LocalEngine;
