//! Likes, saves and feed follows.
//!
//! Like and save counts feed the hot ranking; saved items are protected from
//! cleanup; follows back the denormalized `feeds.follower_count`. Listings
//! read per-viewer flags and the liked and saved lists from here.

mod repository;
mod types;

pub use repository::EngagementRepository;
pub use types::{EngagedItem, ViewerFlags};
