#![forbid(unsafe_code)]

pub mod formula;
pub mod gate;
pub mod registry;
pub mod routes;
pub mod state;
