#[macro_use] extern crate lazy_static;

pub mod types;
pub mod constants;
pub mod data_types;
pub mod error;
pub mod config;
pub mod reference;
pub mod input;
pub mod normalize;
pub mod bio;
pub mod pipeline;
pub mod export;
pub mod api;
