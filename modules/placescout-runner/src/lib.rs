pub mod seeds;

pub use seeds::{create_seed_jobs, create_tiled_seed_jobs, SeedOptions, TilingOptions};
