pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod genes;
pub mod group;
pub mod output;
pub mod paginate;
pub mod reconcile;
pub mod search;
pub mod spp;
pub mod store;
