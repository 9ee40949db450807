//! Item catalog: normalization, set-based merge and single inserts.

mod normalizer;
mod repository;
mod service;
mod types;

pub use normalizer::{normalize_item, normalize_items};
pub(crate) use repository::{ItemRow, ITEM_COLUMNS};
pub use repository::ItemRepository;
pub use service::ItemService;
pub use types::{Item, NewItem, UpsertReport};
