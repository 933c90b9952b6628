pub mod completion;
pub mod config;
pub mod embedding;
pub mod error;
pub mod evaluation;
pub mod pipeline;
pub mod report;
pub mod retrieval;
pub mod storage;
pub mod telemetry;


pub use error::{RagError, Result};
