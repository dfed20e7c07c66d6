//! Flows that combine core operations with HTTP concerns.

pub mod auth;
