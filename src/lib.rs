pub mod config;
pub mod data_types;
pub mod logging;
pub mod remote;
pub mod schema;
pub mod sync;
pub mod testutils;
