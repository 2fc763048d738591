pub mod runs;
pub mod tilejobs;

pub use runs::RunsRepository;
pub use tilejobs::TileJobsRepository;
