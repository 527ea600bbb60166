pub mod config;
pub mod errors;
pub mod ingestor;
pub mod schema;
pub mod session;
pub mod sink;
pub mod source;
pub mod telemetry;

pub use config::ShipperConfig;
pub use errors::{Result, ShipperError};
pub use ingestor::{Ingestor, RunState, Termination};
pub use session::Session;
