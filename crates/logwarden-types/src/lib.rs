mod error;
mod event;
mod filter;
mod frame;
mod level;
mod retention;
mod util;

pub use error::{Error, Result};
pub use event::{GeoInfo, LogEvent, UserAgentInfo, MAX_CATEGORY_CHARS, MAX_MESSAGE_BYTES, MAX_METADATA_BYTES};
pub use filter::{FilterSpec, TextMatch};
pub use frame::{Protocol, RawFrame};
pub use level::LogLevel;
pub use retention::{glob_matches, PolicyKind, RetentionPolicy};
pub use util::{minute_bucket, truncate_utf8};
