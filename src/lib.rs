pub mod beacon;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod macros;
pub mod models;
pub mod parser;
pub mod reporting;
pub mod sink;
pub mod tracker;
