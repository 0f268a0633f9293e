// Library modules; the binary in main.rs wires them together

pub mod analytics;
pub mod config;
pub mod db;
pub mod embedding;
pub mod errors;
pub mod features;
pub mod jobs;
pub mod logging;
pub mod ml;
pub mod predict;
pub mod profile;
pub mod resume;
pub mod server;
pub mod whatif;
