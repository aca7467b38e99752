pub mod api;
pub mod config;
pub mod error;
pub mod migrate;
pub mod page;
pub mod path;
pub mod publish;
pub mod source;
pub mod sync;
