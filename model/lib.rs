#[macro_use]
mod serde_with;

pub mod schema;

pub use schema::*;
