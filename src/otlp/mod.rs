pub mod attrs;
pub mod converter;
pub mod ids;
pub mod raw;

pub use converter::{convert_resource_spans, ConverterConfig, ConvertedBatch, TraceSynthesisEvent};
