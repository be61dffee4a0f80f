//! Manifest patcher: surgical, indentation-landmark editing of a
//! container's `resources` block without reserializing the YAML file.

pub mod patcher;

pub use patcher::{patch_container_resources, PatchReason};
