//! stdio-referee library
//!
//! This crate runs game referee logic in an external worker process:
//! - Line-based framing of directives and reports over the worker's stdio
//! - Worker and player process transports with timeout-bounded reads
//! - The phase loop that drives INIT, turns and the end of the match

pub mod config;
pub mod error;
pub mod game;
pub mod player;
pub mod referee;
pub mod transport;
