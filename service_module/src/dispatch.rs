//! Nightly newsletter fan-out.
//!
//! One run enumerates the users active at its start and works through them
//! with a bounded worker pool. Each user's generate, persist, send sequence
//! is strictly ordered for that user and completely independent of every
//! other user: a failure is recorded and the run moves on. Workers
//! report tagged outcomes over a channel and the counts are reduced once at
//! the end, so aggregation never races. Failed users are never retried
//! within a run; the next scheduled run or a manual re-trigger picks them
//! up.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::collaborators::{ContentGenerator, GenerateParams, OutboundSender};
use crate::email::OutgoingEmail;
use crate::routing::RouteConfig;
use crate::store::{PersonalizationStore, StoreError, UserRecord};

/// Aggregate result of one run. `success_count + failure_count` always
/// equals `total_users`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub total_users: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub duration_ms: u64,
}

#[derive(Debug)]
enum UserOutcome {
    Sent { user_id: String },
    AlreadySent { user_id: String },
    Failed { user_id: String, error: String },
}

pub struct BatchDispatcher {
    store: Arc<PersonalizationStore>,
    generator: Arc<dyn ContentGenerator>,
    sender: Arc<dyn OutboundSender>,
    route_config: RouteConfig,
    max_concurrency: usize,
}

impl BatchDispatcher {
    pub fn new(
        store: Arc<PersonalizationStore>,
        generator: Arc<dyn ContentGenerator>,
        sender: Arc<dyn OutboundSender>,
        route_config: RouteConfig,
        max_concurrency: usize,
    ) -> Self {
        Self {
            store,
            generator,
            sender,
            route_config,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Execute one newsletter run. Only store enumeration can fail the run
    /// as a whole; per-user failures are isolated into the stats.
    pub fn run(&self) -> Result<RunStats, StoreError> {
        let started = Instant::now();
        let users = self.store.list_active_users()?;
        let total_users = users.len();
        let run_date = Utc::now().date_naive();
        info!("newsletter run starting for {} active user(s)", total_users);

        if users.is_empty() {
            return Ok(RunStats {
                total_users: 0,
                success_count: 0,
                failure_count: 0,
                duration_ms: elapsed_ms(started),
            });
        }

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<UserRecord>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<UserOutcome>();
        for user in users {
            let _ = job_tx.send(user);
        }
        drop(job_tx);

        let workers = self.max_concurrency.min(total_users);
        let outcomes: Vec<UserOutcome> = thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok(user) = job_rx.recv() {
                        let user_id = user.id.clone();
                        let outcome = match self.process_user(&user, run_date) {
                            Ok(outcome) => outcome,
                            Err(error) => {
                                warn!("newsletter failed for user {}: {}", user_id, error);
                                UserOutcome::Failed { user_id, error }
                            }
                        };
                        let _ = result_tx.send(outcome);
                    }
                });
            }
            drop(result_tx);
            result_rx.iter().collect()
        });

        let mut success_count = 0;
        let mut failure_count = 0;
        for outcome in &outcomes {
            match outcome {
                UserOutcome::Sent { .. } => success_count += 1,
                UserOutcome::AlreadySent { user_id } => {
                    info!("newsletter already sent today for user {}", user_id);
                    success_count += 1;
                }
                UserOutcome::Failed { .. } => failure_count += 1,
            }
        }

        let stats = RunStats {
            total_users,
            success_count,
            failure_count,
            duration_ms: elapsed_ms(started),
        };
        info!(
            "newsletter run finished: {}/{} succeeded, {} failed, {}ms",
            stats.success_count, stats.total_users, stats.failure_count, stats.duration_ms
        );
        Ok(stats)
    }

    /// One user's strictly ordered sequence. The same-day row check makes a
    /// retried trigger a no-op for users the earlier run already covered.
    fn process_user(&self, user: &UserRecord, run_date: NaiveDate) -> Result<UserOutcome, String> {
        if self
            .store
            .newsletter_exists_on(&user.id, run_date)
            .map_err(|err| err.to_string())?
        {
            return Ok(UserOutcome::AlreadySent {
                user_id: user.id.clone(),
            });
        }

        let customizations = self
            .store
            .customizations_for_user(&user.id)
            .map_err(|err| err.to_string())?;
        let profile = build_profile(&user.prompt, customizations.iter().map(|c| c.content.as_str()));
        let generated = self
            .generator
            .generate(&GenerateParams {
                profile,
                context: newsletter_context(run_date),
            })
            .map_err(|err| err.to_string())?;

        self.store
            .insert_newsletter(&user.id, &generated.content, Utc::now())
            .map_err(|err| err.to_string())?;

        let email = OutgoingEmail {
            from: self.route_config.encode_reply_address(&user.id),
            to: user.email.clone(),
            subject: newsletter_subject(run_date),
            body: generated.content,
            in_reply_to: None,
            references: Vec::new(),
        };
        self.sender.send(&email).map_err(|err| err.to_string())?;

        Ok(UserOutcome::Sent {
            user_id: user.id.clone(),
        })
    }
}

/// The generation profile: the user's standing prompt followed by every
/// accepted feedback entry, oldest first.
fn build_profile<'a>(prompt: &str, customizations: impl Iterator<Item = &'a str>) -> String {
    let mut profile = prompt.trim().to_string();
    for content in customizations {
        if !profile.is_empty() {
            profile.push_str("\n\n");
        }
        profile.push_str(content.trim());
    }
    profile
}

fn newsletter_context(run_date: NaiveDate) -> String {
    format!(
        "Write today's personalized newsletter edition for {}. \
         Follow the reader's profile and feedback above. Plain text, \
         ready to send as an email body.",
        run_date.format("%B %d, %Y")
    )
}

fn newsletter_subject(run_date: NaiveDate) -> String {
    format!("Your personifeed for {}", run_date.format("%B %d, %Y"))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
