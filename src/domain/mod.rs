pub mod chess;
pub mod error;
pub mod models;
pub mod settings;
