pub mod camera;
pub mod config;
pub mod error;
pub mod input;
pub mod net;
pub mod physics;
pub mod render;
pub mod session;
pub mod state;
pub mod vehicle;
pub mod wheel;

pub use config::SimConfig;
pub use error::DriveError;
pub use session::Session;
