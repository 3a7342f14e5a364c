pub mod batch;
pub mod cli;
pub mod config;
pub mod db;
pub mod digest;
pub mod error;
pub mod model;
pub mod reach;
pub mod report;
pub mod resolve;
pub mod root;
pub mod rpc;
pub mod scope;
pub mod snapshot;
pub mod source;
pub mod validate;
pub mod verify;

pub use error::{SourceKind, ValidateError, ValidateResult};
pub use report::{ValidationReport, ValidationVerdict, Warning};
pub use source::{FlowGraph, MemoryFlowGraph, MemoryIndex, Sources, StaticIndex};
pub use validate::{ValidateOptions, Validator, validate};
