//! Optional in-process nightly trigger.
//!
//! When a cron expression is configured, a background thread fires the
//! batch dispatcher at each occurrence. Without one, an external scheduler
//! owns triggering through the batch endpoint and nothing runs here.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tracing::{error, info};

use crate::dispatch::BatchDispatcher;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct ScheduleControl {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ScheduleControl {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stop_and_join(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn validate_cron_expression(expression: &str) -> Result<(), cron::error::Error> {
    Schedule::from_str(expression).map(|_| ())
}

pub fn spawn_newsletter_schedule(
    expression: &str,
    dispatcher: Arc<BatchDispatcher>,
) -> Result<ScheduleControl, cron::error::Error> {
    let schedule = Schedule::from_str(expression)?;
    let stop = Arc::new(AtomicBool::new(false));
    let handle = {
        let stop = stop.clone();
        thread::spawn(move || {
            let mut next = schedule.upcoming(Utc).next();
            while !stop.load(Ordering::Relaxed) {
                if let Some(due) = next {
                    if Utc::now() >= due {
                        info!("newsletter schedule firing run due at {}", due);
                        match dispatcher.run() {
                            Ok(stats) => info!(
                                "scheduled newsletter run done: {}/{} succeeded",
                                stats.success_count, stats.total_users
                            ),
                            Err(err) => error!("scheduled newsletter run failed: {}", err),
                        }
                        next = schedule.upcoming(Utc).next();
                    }
                }
                thread::sleep(POLL_INTERVAL);
            }
        })
    };
    Ok(ScheduleControl {
        stop,
        handle: Some(handle),
    })
}
