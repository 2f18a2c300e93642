use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use logwarden_store::Database;

use crate::shutdown::Shutdown;

/// Restart delay after a task panic.
const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Run a component under supervision: a panic is captured, recorded as a
/// `task_panic` ops event, and the component is restarted after a short
/// backoff. Data errors never get here; components return only on shutdown.
pub fn spawn_supervised<F, Fut>(
    name: &'static str,
    db: Arc<Mutex<Database>>,
    mut shutdown: Shutdown,
    factory: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            if shutdown.is_shutdown() {
                return;
            }

            let run = tokio::spawn(factory());
            match run.await {
                Ok(()) => {
                    // Clean return: the component saw the shutdown signal
                    info!(task = name, "task finished");
                    return;
                }
                Err(join_err) if join_err.is_panic() => {
                    let panic_msg = panic_message(join_err.into_panic());
                    error!(task = name, panic = %panic_msg, "task panicked, restarting");
                    if let Ok(mut db) = db.lock() {
                        let _ = db.record_ops_event(
                            "task_panic",
                            &serde_json::json!({ "task": name, "message": panic_msg }),
                        );
                    }
                }
                Err(_) => return, // cancelled
            }

            tokio::select! {
                _ = tokio::time::sleep(RESTART_BACKOFF) => {}
                _ = shutdown.wait() => return,
            }
        }
    })
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn panicking_task_restarts_and_records() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let (handle, shutdown) = Shutdown::new();
        let attempts = Arc::new(AtomicU32::new(0));

        let attempts2 = attempts.clone();
        let sup = spawn_supervised("boomer", db.clone(), shutdown, move || {
            let attempts = attempts2.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    panic!("first run explodes");
                }
                // Second run parks until cancelled
                std::future::pending::<()>().await;
            }
        });

        // Give the first run time to panic and the restart to begin
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(attempts.load(Ordering::SeqCst) >= 2);

        let events = db.lock().unwrap().recent_ops_events(5).unwrap();
        assert!(events.iter().any(|e| e.kind == "task_panic"));

        handle.trigger();
        sup.abort();
    }
}
