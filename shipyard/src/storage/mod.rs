//! Configuration, workspace layout and the content store

pub mod content;
pub mod layout;
pub mod settings;
