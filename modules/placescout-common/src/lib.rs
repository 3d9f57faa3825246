pub mod config;
pub mod entry;
pub mod error;
pub mod geo;
pub mod input;
pub mod phones;
pub mod social;

pub use config::Config;
pub use entry::*;
pub use error::PlacescoutError;
pub use geo::*;
pub use input::*;
pub use phones::*;
pub use social::*;
