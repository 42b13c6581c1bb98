pub mod config;
pub mod network;
pub mod relay;
#[cfg(test)]
mod sim;
pub mod tracetracking;
pub mod transaction;
pub mod tvm;
pub mod txm;
pub mod types;
pub mod utils;
pub mod wallet;
