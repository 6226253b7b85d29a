pub mod backend;
pub mod cancel;
pub mod config;
pub mod cursor;
pub mod domain;
pub mod error;
pub mod links;
pub mod normalize;
pub mod output;
pub mod parsers;
pub mod pipeline;
pub mod retrieval;
pub mod search;
pub mod store;
