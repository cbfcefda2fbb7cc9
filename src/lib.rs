pub mod cli;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod model;
pub mod tools;
pub mod gdelt;
pub mod store;
pub mod wiki;
pub mod webpage;
pub mod research;
pub mod extract;
pub mod pipeline;
pub mod forecast;

#[cfg(test)]
mod tests;
