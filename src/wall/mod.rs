//! Walls: per-user collections of feeds that listings are served from.

mod repository;
mod types;

pub use repository::WallRepository;
pub use types::{NewWall, Wall};
