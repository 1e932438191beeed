#[macro_use]
extern crate tracing;

pub mod cli;
pub mod client;
pub mod config;
pub mod dbus;
pub mod headless;
pub mod state;
pub mod utils;
pub mod window;

#[cfg(test)]
mod tests;
