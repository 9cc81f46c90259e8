// モジュールの公開と型の再エクスポート
pub mod memory;
pub mod models;
pub mod sqlx_impl;
pub mod traits;

pub use memory::MemoryStore;
pub use sqlx_impl::SqlxStore;
pub use traits::{CatalogStore, CounterStore, InteractionStore, SimilarityStore, UserProfileStore};
