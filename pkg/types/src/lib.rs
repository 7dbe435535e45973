//! Resource and configuration types shared across the meshca crates.

pub mod certificate;
pub mod config;
pub mod identity;
pub mod pod;
pub mod validate;
