//! The binary columnar container: layout, writer and reader.

pub mod format;
pub mod reader;
pub mod writer;

pub use reader::{ContainerReader, DecodedBlock};
pub use writer::{ContainerSummary, ContainerWriter};
