#![forbid(unsafe_code)]
//! Extraction: the traversal driver walks an open image depth-first in
//! on-disk order and emits typed events to a `Sink`; the filesystem sink
//! materializes them onto a host filesystem. The sink never decides
//! fatality: decode errors stay with the driver, and sink-side
//! refusals (ownership, device nodes, xattrs) degrade to warnings.

mod driver;
mod fs_sink;
mod report;
mod sink;

pub use driver::{ExtractOptions, Traversal};
pub use fs_sink::FsSink;
pub use report::ExtractReport;
pub use sink::{EntryMeta, Sink, SpecialKind};
