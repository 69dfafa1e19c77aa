pub mod aggregator;
pub mod cache;
pub mod collector;
pub mod github;
pub mod narrative;
pub mod pipeline;
pub mod scoring;
pub mod store;
