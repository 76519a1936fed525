//! Wire models shared by the shipyard HTTP surfaces.

pub mod models;

pub use models::*;
