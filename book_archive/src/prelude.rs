pub use crate::error::{ExtractionError, OpenError};
pub use crate::model::{BookId, Entry, EntryId, EntryKind, FormatKind, RawEntry};
pub use crate::tool::{ExternalTool, ToolConfig, ToolSettings};
pub use crate::{Book, FormatAdapter};
