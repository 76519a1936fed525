//! Background workers

pub mod fanout;
pub mod tracker;
