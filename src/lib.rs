//! MEGA.NZ virtual drive
//!
//! This library exposes the internal modules for testing purposes

pub mod config;
pub mod mega_service;
pub mod vfs;
