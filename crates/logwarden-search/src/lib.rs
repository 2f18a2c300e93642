mod cursor;
mod engine;
mod error;
mod export;
mod literals;
mod planner;
mod saved;

pub use cursor::{decode_cursor, encode_cursor};
pub use engine::{facets, search, FacetResult, SearchPage, PAGE_MAX};
pub use error::{Error, Result};
pub use export::{export_csv, EXPORT_COLUMNS};
pub use literals::obligatory_literals;
pub use planner::{plan, Plan, TextVerifier, REGEX_SCAN_CAP};
pub use saved::{delete_saved, list_saved, run_saved, save_search, SavedSearchInput};
