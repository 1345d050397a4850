pub mod document;
pub mod events;
pub mod generation;
pub mod imagery;
pub mod models;
