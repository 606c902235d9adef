use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::ReviewError;
use crate::models::{Card, DueCursor, ReviewRecord};
use crate::scheduler::{Grade, Scheduler};
use crate::store::CardStore;
use crate::{log_service_error, log_service_start, log_service_warn};

/// How many times a grading event is recomputed after losing a write race
/// before the conflict is surfaced to the caller.
const MAX_SAVE_ATTEMPTS: u32 = 3;

/// Orchestrates one grading event: read card, run the pure scheduler, persist
/// conditionally. The scheduler never touches storage and the store never
/// computes, so the only mutable step is the final conditional save.
#[derive(Clone)]
pub struct ReviewService {
    store: CardStore,
    scheduler: Scheduler,
}

impl ReviewService {
    pub fn new(store: CardStore, scheduler: Scheduler) -> Self {
        Self { store, scheduler }
    }

    /// Ensure the card for (user, question) exists, creating it on first
    /// exposure. Safe to call any number of times.
    pub async fn ensure_card(
        &self,
        user_id: Uuid,
        question_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Card, ReviewError> {
        self.store.get_or_create(user_id, question_id, now).await
    }

    pub async fn get_card(
        &self,
        user_id: Uuid,
        question_id: Uuid,
    ) -> Result<Option<Card>, ReviewError> {
        self.store.get(user_id, question_id).await
    }

    /// Record one grading event and return the rescheduled card.
    ///
    /// Runs read -> schedule -> conditional save. A lost write race is
    /// resolved by re-reading and recomputing; if the re-read shows a review
    /// newer than `now`, the scheduler rejects the replay as out of order and
    /// the stale submission is dropped rather than applied.
    pub async fn record_review(
        &self,
        user_id: Uuid,
        question_id: Uuid,
        grade: i32,
        now: DateTime<Utc>,
    ) -> Result<Card, ReviewError> {
        let grade = Grade::from_int(grade).ok_or(ReviewError::InvalidGrade(grade))?;
        log_service_start!("review_service", "record_review", question_id = question_id);

        let mut card = self.store.get_or_create(user_id, question_id, now).await?;

        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let (updated, log) = self.scheduler.schedule(&card, grade, now)?;

            match self.store.save(&updated, card.last_review).await {
                Ok(()) => {
                    self.store
                        .record_review(&ReviewRecord {
                            id: Uuid::new_v4(),
                            user_id,
                            question_id,
                            review_date: now,
                            grade: grade.as_int(),
                            elapsed_days: log.elapsed_days,
                            scheduled_days: log.scheduled_days,
                            state_after: updated.state,
                        })
                        .await?;
                    return Ok(updated);
                }
                Err(ReviewError::StaleWrite { .. }) if attempt < MAX_SAVE_ATTEMPTS => {
                    log_service_warn!(
                        "review_service",
                        "record_review",
                        format!("write conflict on attempt {attempt}, re-reading card")
                    );
                    card = self.store.get_or_create(user_id, question_id, now).await?;
                }
                Err(err) => {
                    log_service_error!("review_service", "record_review", error = err);
                    return Err(err);
                }
            }
        }

        Err(ReviewError::StaleWrite {
            user_id,
            question_id,
        })
    }

    /// Page of cards due at or before `now`, ascending by due date.
    pub async fn due_cards(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        limit: i64,
        cursor: Option<&DueCursor>,
    ) -> Result<Vec<Card>, ReviewError> {
        self.store.get_due(user_id, now, limit, cursor).await
    }

    pub async fn due_count(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<i64, ReviewError> {
        self.store.due_count(user_id, now).await
    }
}
