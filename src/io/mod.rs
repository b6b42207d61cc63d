pub mod compression;
pub mod glob;
