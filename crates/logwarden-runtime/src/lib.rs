mod config;
mod enricher;
mod error;
mod hub;
mod metrics;
mod pipeline;
mod queue;
mod retention;
mod retry;
mod rules_task;
mod server;
mod shutdown;
mod supervisor;
mod writer;

pub mod http;
pub mod listeners;

pub use config::{Config, ListenerToggles, Schedule};
pub use enricher::{parse_user_agent, Enricher, GeoTable};
pub use error::{Error, Result};
pub use hub::{ClientHandle, StreamHub, CHANNELS, MAX_CLIENTS};
pub use metrics::{IngestMetrics, ProtocolCounters};
pub use pipeline::{run_normalizer, FRAME_CHANNEL_CAPACITY};
pub use queue::{IngestQueue, QUEUE_CAPACITY};
pub use retry::RetryWorker;
pub use rules_task::run_rule_engine;
pub use retention::RetentionEngine;
pub use server::Server;
pub use shutdown::{Shutdown, ShutdownHandle};
pub use supervisor::spawn_supervised;
pub use writer::{BatchWriter, PostCommit, MAX_BATCH, MAX_WAIT_MS};
