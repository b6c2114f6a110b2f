#![forbid(unsafe_code)]

pub mod errors;
pub mod notice;
pub mod schema;
pub mod spec;
pub mod state;
pub mod traits;
pub mod types;
