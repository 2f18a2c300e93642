use logwarden_protocols::filetail::{TailPosition, TailReader};
use logwarden_types::{Protocol, RawFrame};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::ListenerContext;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const DISCOVER_INTERVAL: Duration = Duration::from_secs(5);

/// Tail a file, or every regular file under a directory. Offsets persist in
/// the settings table so a restart resumes where it left off; rotation
/// (inode change) restarts the affected file from zero.
pub(crate) async fn run(root: PathBuf, ctx: ListenerContext) {
    let mut shutdown = ctx.shutdown.clone();
    let mut readers: HashMap<PathBuf, TailReader> = HashMap::new();
    let mut poll = tokio::time::interval(POLL_INTERVAL);
    let mut discover = tokio::time::interval(DISCOVER_INTERVAL);

    loop {
        tokio::select! {
            _ = discover.tick() => {
                for path in discover_files(&root) {
                    if !readers.contains_key(&path) {
                        match attach(&path, &ctx) {
                            Ok(reader) => {
                                debug!(path = %path.display(), "tailing file");
                                readers.insert(path, reader);
                            }
                            Err(err) => warn!(path = %path.display(), error = %err, "cannot tail"),
                        }
                    }
                }
                readers.retain(|path, _| path.exists());
            }
            _ = poll.tick() => {
                for reader in readers.values_mut() {
                    poll_reader(reader, &ctx);
                }
            }
            _ = shutdown.wait() => {
                for reader in readers.values() {
                    save_position(reader, &ctx);
                }
                return;
            }
        }
    }
}

fn discover_files(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

fn attach(path: &Path, ctx: &ListenerContext) -> std::io::Result<TailReader> {
    let stored = load_position(path, ctx);
    Ok(match stored {
        Some(position) => TailReader::resume(path, position),
        None => TailReader::from_end(path)?,
    })
}

fn poll_reader(reader: &mut TailReader, ctx: &ListenerContext) {
    match reader.poll() {
        Ok((lines, rotated)) => {
            if rotated {
                debug!(path = %reader.path().display(), "rotation detected");
            }
            let had_lines = !lines.is_empty();
            for line in lines {
                ctx.forward(RawFrame::new(Protocol::FileTail, line, None));
            }
            if had_lines || rotated {
                save_position(reader, ctx);
            }
        }
        Err(err) => {
            warn!(path = %reader.path().display(), error = %err, "tail poll failed");
        }
    }
}

fn offset_key(path: &Path) -> String {
    format!("tail_offset:{}", path.display())
}

fn load_position(path: &Path, ctx: &ListenerContext) -> Option<TailPosition> {
    let db = ctx.db.lock().ok()?;
    let setting = db.get_setting(&offset_key(path)).ok()??;
    serde_json::from_str(&setting.value).ok()
}

fn save_position(reader: &TailReader, ctx: &ListenerContext) {
    let Ok(position) = serde_json::to_string(&reader.position()) else {
        return;
    };
    if let Ok(mut db) = ctx.db.lock() {
        let _ = db.put_setting(
            &offset_key(reader.path()),
            &position,
            "json",
            "file_tail",
            None,
        );
    }
}
