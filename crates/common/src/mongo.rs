mod client;
mod config;
mod document_repository;

pub use client::*;
pub use config::*;
pub use document_repository::*;
