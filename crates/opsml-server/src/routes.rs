//! HTTP route handlers

pub mod cards;
pub mod files;
