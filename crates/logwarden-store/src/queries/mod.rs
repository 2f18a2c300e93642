mod alert_rules;
mod audit;
mod auth;
mod events;
mod failed_batches;
mod ops_events;
mod retention;
mod saved_searches;
mod settings;
mod users;

pub use events::FacetField;
pub use retention::EvictionStats;
