//! Audio decoding and output engine.
//!
//! - [`probe`]: retrying duration/tag discovery
//! - [`decode`]: pull-based decode pipeline with seek and position
//! - [`output`]: output devices driven by a dedicated command executor
//! - [`runtime`]: process-wide initialize/shutdown

pub mod backend;
pub mod buffer;
pub mod command;
pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod output;
pub mod playback;
pub mod probe;
pub mod runtime;
pub mod source;
pub mod symphonia_backend;

pub use command::Command;
pub use config::{EngineConfig, RuntimeConfig};
pub use decode::{DecodePipeline, SampleBlock};
pub use error::{BackendError, EngineError, Result};
pub use output::{DeviceState, OutputDevice, OutputFormat, OutputRequest};
pub use probe::{Metadata, MetadataProbe};
pub use runtime::{initialize, shutdown};
pub use source::{PipelineSource, SourceControl};
