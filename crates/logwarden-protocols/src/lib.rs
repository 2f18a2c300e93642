mod error;

pub mod beats;
pub mod filetail;
pub mod fluent;
pub mod gelf;
pub mod http;
pub mod normalize;
pub mod syslog;

pub use error::{Error, Result};
pub use normalize::{normalize_frame, EventDraft, LevelHint, SourceFields};
