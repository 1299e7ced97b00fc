pub mod boundary;
pub mod color;
pub mod config;
pub mod error;
pub mod export;
pub mod hazard;
pub mod households;
pub mod layers;
pub mod legend;
pub mod matcher;
pub mod normalize;
pub mod render;
pub mod reproject;
pub mod selection;
pub mod server;
pub mod store;
pub mod types;

pub use error::{CensusError, Result};
