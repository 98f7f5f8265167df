pub mod analysis;
pub mod batch;
pub mod config;
pub mod io;
pub mod logging;
pub mod models;
pub mod processing;
