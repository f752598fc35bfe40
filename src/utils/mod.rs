pub use cancel_token::*;
pub use health_flag::*;
pub use status_cell::*;

pub mod affinity;
mod cancel_token;
mod health_flag;
pub mod logger;
pub mod params_io;
mod status_cell;
pub mod timer;
