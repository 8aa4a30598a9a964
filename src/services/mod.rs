pub mod cold_start;
pub mod rating_source;
pub mod rating_store;
pub mod recommendation;
pub mod serving;
pub mod snapshot;
pub mod training;
