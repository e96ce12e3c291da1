pub mod api;
pub mod batch;
pub mod config;
pub mod error;
pub mod fuzzy;
pub mod merge;
pub mod payload;
pub mod runtime;
pub mod select;
pub mod store;
pub mod workitem;
