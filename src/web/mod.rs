pub mod audit;
pub mod no_cache;
pub mod views;
