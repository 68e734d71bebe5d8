mod incremental;
mod sync;

pub use incremental::{BoundedLine, IncrementalLineSplitter};
pub use sync::SyncBoundedLineReader;
