pub mod models;
pub mod repository;

pub use models::RankedStatus;
pub use repository::{
    BeatmapRepository, CachedBeatmapRepository, InMemoryBeatmapRepository,
    PostgresBeatmapRepository,
};
