pub mod blob;
pub mod span;
pub mod trace;
pub mod usage;
pub mod value;

pub use blob::BlobReference;
pub use span::{Span, SpanEvent, SpanKind, SpanLink, StatusCode};
pub use trace::TraceSummary;
pub use value::Value;
