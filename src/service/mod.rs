pub mod backfill;
pub mod monitor;
pub mod pair;
pub mod pipeline;
