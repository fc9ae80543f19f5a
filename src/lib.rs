#[macro_use]
extern crate log;

pub mod channel;
pub mod climate;
pub mod config;
pub mod unit;

#[cfg(test)]
mod testing;
