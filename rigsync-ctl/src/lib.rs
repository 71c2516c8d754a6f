pub mod config;
pub mod console;

pub use console::{ConsoleError, Outcome, propose, render, wait_for_sync};
