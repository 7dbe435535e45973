//! Centralized constants for the meshca project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod issuance;
pub mod paths;
pub mod state;
