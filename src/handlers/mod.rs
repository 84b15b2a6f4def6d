pub mod config;
pub mod rooms;
pub mod sessions;

pub use config::*;
pub use rooms::*;
pub use sessions::*;
