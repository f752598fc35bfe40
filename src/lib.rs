pub mod config;
pub mod descriptor;
pub mod error;
pub mod factory;
pub mod manager;
pub mod model;
pub mod utils;

pub mod prelude;
