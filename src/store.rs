use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::ReviewError;
use crate::log_db_operation;
use crate::models::{Card, CardState, DueCursor, ReviewRecord};

/// Largest due page a single query will return.
pub const MAX_DUE_PAGE: i64 = 500;

/// Durable keyed storage for cards, plus the append-only review log.
///
/// Writes go through [`CardStore::save`], which carries an optimistic
/// concurrency check on `last_review`: a row changed since the caller read it
/// fails with `StaleWrite` instead of being overwritten.
#[derive(Clone)]
pub struct CardStore {
    pool: SqlitePool,
}

impl CardStore {
    pub async fn new(database_url: &str) -> Result<Self, ReviewError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = CardStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), ReviewError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cards (
                user_id TEXT NOT NULL,
                question_id TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'New',
                difficulty REAL NOT NULL,
                stability REAL NOT NULL,
                due_date TEXT NOT NULL,
                last_review TEXT,
                reps INTEGER NOT NULL DEFAULT 0,
                lapses INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, question_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // get_due filters on user and scans the due range in order.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cards_user_due ON cards (user_id, due_date)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reviews (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                question_id TEXT NOT NULL,
                review_date TEXT NOT NULL,
                grade INTEGER NOT NULL,
                elapsed_days REAL NOT NULL,
                scheduled_days REAL NOT NULL,
                state_after TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        log_db_operation!(info, "migrate", "card store schema initialized");
        Ok(())
    }

    /// Fetch the card for (user, question), creating the default row on first
    /// exposure. Insert-if-absent, so concurrent first accesses agree on a
    /// single row.
    pub async fn get_or_create(
        &self,
        user_id: Uuid,
        question_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Card, ReviewError> {
        let card = Card::new(user_id, question_id, now);

        sqlx::query(
            r#"
            INSERT INTO cards (user_id, question_id, state, difficulty, stability,
                               due_date, last_review, reps, lapses, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT (user_id, question_id) DO NOTHING
            "#,
        )
        .bind(card.user_id.to_string())
        .bind(card.question_id.to_string())
        .bind(card.state.as_str())
        .bind(card.difficulty)
        .bind(card.stability)
        .bind(fmt_ts(card.due_date))
        .bind(card.last_review.map(fmt_ts))
        .bind(card.reps)
        .bind(card.lapses)
        .bind(fmt_ts(card.created_at))
        .bind(fmt_ts(card.updated_at))
        .execute(&self.pool)
        .await?;

        match self.get(user_id, question_id).await? {
            Some(card) => Ok(card),
            None => Err(ReviewError::CardNotFound {
                user_id,
                question_id,
            }),
        }
    }

    pub async fn get(
        &self,
        user_id: Uuid,
        question_id: Uuid,
    ) -> Result<Option<Card>, ReviewError> {
        let row = sqlx::query("SELECT * FROM cards WHERE user_id = ?1 AND question_id = ?2")
            .bind(user_id.to_string())
            .bind(question_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_card(&row)).transpose()
    }

    /// Overwrite the row for the card's (user, question) pair.
    ///
    /// `expected_last_review` is the value the caller read before computing
    /// the new state; if the stored row no longer matches, another review was
    /// persisted concurrently and the write fails with `StaleWrite`.
    pub async fn save(
        &self,
        card: &Card,
        expected_last_review: Option<DateTime<Utc>>,
    ) -> Result<(), ReviewError> {
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET state = ?1, difficulty = ?2, stability = ?3, due_date = ?4,
                last_review = ?5, reps = ?6, lapses = ?7, updated_at = ?8
            WHERE user_id = ?9 AND question_id = ?10 AND last_review IS ?11
            "#,
        )
        .bind(card.state.as_str())
        .bind(card.difficulty)
        .bind(card.stability)
        .bind(fmt_ts(card.due_date))
        .bind(card.last_review.map(fmt_ts))
        .bind(card.reps)
        .bind(card.lapses)
        .bind(fmt_ts(card.updated_at))
        .bind(card.user_id.to_string())
        .bind(card.question_id.to_string())
        .bind(expected_last_review.map(fmt_ts))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get(card.user_id, card.question_id).await? {
                Some(_) => Err(ReviewError::StaleWrite {
                    user_id: card.user_id,
                    question_id: card.question_id,
                }),
                None => Err(ReviewError::CardNotFound {
                    user_id: card.user_id,
                    question_id: card.question_id,
                }),
            };
        }

        Ok(())
    }

    /// Cards for `user_id` with `due_date <= before`, ascending by due date
    /// (question id breaks ties). `cursor` resumes after the last card of the
    /// previous page.
    pub async fn get_due(
        &self,
        user_id: Uuid,
        before: DateTime<Utc>,
        limit: i64,
        cursor: Option<&DueCursor>,
    ) -> Result<Vec<Card>, ReviewError> {
        let limit = limit.clamp(1, MAX_DUE_PAGE);

        let rows = match cursor {
            Some(cursor) => {
                sqlx::query(
                    r#"
                    SELECT * FROM cards
                    WHERE user_id = ?1 AND due_date <= ?2
                      AND (due_date > ?3 OR (due_date = ?3 AND question_id > ?4))
                    ORDER BY due_date ASC, question_id ASC
                    LIMIT ?5
                    "#,
                )
                .bind(user_id.to_string())
                .bind(fmt_ts(before))
                .bind(fmt_ts(cursor.due_date))
                .bind(cursor.question_id.to_string())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM cards
                    WHERE user_id = ?1 AND due_date <= ?2
                    ORDER BY due_date ASC, question_id ASC
                    LIMIT ?3
                    "#,
                )
                .bind(user_id.to_string())
                .bind(fmt_ts(before))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_card).collect()
    }

    /// Count of cards due at or before the given instant.
    pub async fn due_count(
        &self,
        user_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<i64, ReviewError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM cards WHERE user_id = ?1 AND due_date <= ?2",
        )
        .bind(user_id.to_string())
        .bind(fmt_ts(before))
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    pub async fn record_review(&self, record: &ReviewRecord) -> Result<(), ReviewError> {
        sqlx::query(
            r#"
            INSERT INTO reviews (id, user_id, question_id, review_date, grade,
                                 elapsed_days, scheduled_days, state_after)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.user_id.to_string())
        .bind(record.question_id.to_string())
        .bind(fmt_ts(record.review_date))
        .bind(record.grade)
        .bind(record.elapsed_days)
        .bind(record.scheduled_days)
        .bind(record.state_after.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn review_count(
        &self,
        user_id: Uuid,
        question_id: Uuid,
    ) -> Result<i64, ReviewError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reviews WHERE user_id = ?1 AND question_id = ?2",
        )
        .bind(user_id.to_string())
        .bind(question_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

/// Timestamps are stored as fixed-width RFC 3339 TEXT (UTC, microseconds) so
/// that lexicographic comparison in SQL matches chronological order.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_card(row: &SqliteRow) -> Result<Card, ReviewError> {
    let user_id = parse_uuid(row.get("user_id"))?;
    let question_id = parse_uuid(row.get("question_id"))?;
    let corrupt = |detail: String| ReviewError::CorruptRecord {
        user_id,
        question_id,
        detail,
    };

    let state_raw: String = row.get("state");
    let state = CardState::parse(&state_raw)
        .ok_or_else(|| corrupt(format!("unknown state '{state_raw}'")))?;

    let due_date = parse_ts(&row.get::<String, _>("due_date")).map_err(&corrupt)?;
    let created_at = parse_ts(&row.get::<String, _>("created_at")).map_err(&corrupt)?;
    let updated_at = parse_ts(&row.get::<String, _>("updated_at")).map_err(&corrupt)?;
    let last_review = row
        .get::<Option<String>, _>("last_review")
        .map(|raw| parse_ts(&raw))
        .transpose()
        .map_err(&corrupt)?;

    Ok(Card {
        user_id,
        question_id,
        state,
        difficulty: row.get("difficulty"),
        stability: row.get("stability"),
        due_date,
        last_review,
        reps: row.get("reps"),
        lapses: row.get("lapses"),
        created_at,
        updated_at,
    })
}

fn parse_uuid(raw: String) -> Result<Uuid, ReviewError> {
    Uuid::parse_str(&raw).map_err(|e| ReviewError::CorruptRecord {
        user_id: Uuid::nil(),
        question_id: Uuid::nil(),
        detail: format!("bad uuid '{raw}': {e}"),
    })
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{raw}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    async fn test_store() -> CardStore {
        CardStore::new("sqlite::memory:").await.unwrap()
    }

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_get_or_create_returns_default_card() {
        let store = test_store().await;
        let now = test_time();
        let user = Uuid::new_v4();
        let question = Uuid::new_v4();

        let card = store.get_or_create(user, question, now).await.unwrap();

        assert_eq!(card.user_id, user);
        assert_eq!(card.question_id, question);
        assert_eq!(card.state, CardState::New);
        assert_eq!(card.due_date, now);
        assert!(card.last_review.is_none());
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = test_store().await;
        let now = test_time();
        let user = Uuid::new_v4();
        let question = Uuid::new_v4();

        let first = store.get_or_create(user, question, now).await.unwrap();
        let second = store
            .get_or_create(user, question, now + Duration::hours(5))
            .await
            .unwrap();

        // The second call must observe the first row, not replace it.
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.due_date, first.due_date);
        assert_eq!(store.due_count(user, now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_or_create_concurrent_first_access() {
        let store = test_store().await;
        let now = test_time();
        let user = Uuid::new_v4();
        let question = Uuid::new_v4();

        let (a, b) = tokio::join!(
            store.get_or_create(user, question, now),
            store.get_or_create(user, question, now),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.created_at, b.created_at);
        assert_eq!(store.due_count(user, now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_save_round_trips_all_fields() {
        let store = test_store().await;
        let now = test_time();
        let mut card = store
            .get_or_create(Uuid::new_v4(), Uuid::new_v4(), now)
            .await
            .unwrap();

        card.state = CardState::Review;
        card.difficulty = 6.25;
        card.stability = 17.5;
        card.due_date = now + Duration::days(17);
        card.last_review = Some(now);
        card.reps = 4;
        card.lapses = 1;
        card.updated_at = now;

        store.save(&card, None).await.unwrap();
        let loaded = store
            .get(card.user_id, card.question_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.state, CardState::Review);
        assert_eq!(loaded.difficulty, 6.25);
        assert_eq!(loaded.stability, 17.5);
        assert_eq!(loaded.due_date, card.due_date);
        assert_eq!(loaded.last_review, Some(now));
        assert_eq!(loaded.reps, 4);
        assert_eq!(loaded.lapses, 1);
    }

    #[tokio::test]
    async fn test_save_rejects_stale_write() {
        let store = test_store().await;
        let now = test_time();
        let card = store
            .get_or_create(Uuid::new_v4(), Uuid::new_v4(), now)
            .await
            .unwrap();

        // First writer wins.
        let mut winner = card.clone();
        winner.last_review = Some(now);
        winner.due_date = now + Duration::days(3);
        store.save(&winner, card.last_review).await.unwrap();

        // Second writer computed from the original read and must be rejected.
        let mut loser = card.clone();
        loser.last_review = Some(now + Duration::minutes(1));
        loser.due_date = now + Duration::days(1);
        let result = store.save(&loser, card.last_review).await;
        assert!(matches!(result, Err(ReviewError::StaleWrite { .. })));

        // The winning write is untouched.
        let stored = store
            .get(card.user_id, card.question_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.due_date, winner.due_date);
    }

    #[tokio::test]
    async fn test_save_missing_row_is_not_found() {
        let store = test_store().await;
        let now = test_time();
        let card = Card::new(Uuid::new_v4(), Uuid::new_v4(), now);

        let result = store.save(&card, None).await;
        assert!(matches!(result, Err(ReviewError::CardNotFound { .. })));
    }

    #[tokio::test]
    async fn test_get_due_boundary_and_ordering() {
        let store = test_store().await;
        let t = test_time();
        let user = Uuid::new_v4();

        for offset in [-1i64, 0, 1] {
            let mut card = store
                .get_or_create(user, Uuid::new_v4(), t)
                .await
                .unwrap();
            card.due_date = t + Duration::days(offset);
            card.updated_at = t;
            store.save(&card, None).await.unwrap();
        }

        let due = store.get_due(user, t, 10, None).await.unwrap();

        // Boundary is inclusive: T-1 and T qualify, T+1 does not.
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].due_date, t - Duration::days(1));
        assert_eq!(due[1].due_date, t);
    }

    #[tokio::test]
    async fn test_get_due_is_scoped_to_user() {
        let store = test_store().await;
        let now = test_time();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();

        store.get_or_create(user, Uuid::new_v4(), now).await.unwrap();
        store.get_or_create(other, Uuid::new_v4(), now).await.unwrap();

        assert_eq!(store.get_due(user, now, 10, None).await.unwrap().len(), 1);
        assert_eq!(store.due_count(user, now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_due_pagination_is_restartable() {
        let store = test_store().await;
        let t = test_time();
        let user = Uuid::new_v4();

        for i in 0..5i64 {
            let mut card = store
                .get_or_create(user, Uuid::new_v4(), t)
                .await
                .unwrap();
            card.due_date = t - Duration::hours(5 - i);
            card.updated_at = t;
            store.save(&card, None).await.unwrap();
        }

        let mut collected = Vec::new();
        let mut cursor: Option<DueCursor> = None;
        loop {
            let page = store.get_due(user, t, 2, cursor.as_ref()).await.unwrap();
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(DueCursor::from_card);
            collected.extend(page);
        }

        assert_eq!(collected.len(), 5);
        for pair in collected.windows(2) {
            assert!(pair[0].due_date <= pair[1].due_date);
        }
    }

    #[tokio::test]
    async fn test_due_count_matches_get_due() {
        let store = test_store().await;
        let now = test_time();
        let user = Uuid::new_v4();

        for _ in 0..3 {
            store.get_or_create(user, Uuid::new_v4(), now).await.unwrap();
        }

        let count = store.due_count(user, now).await.unwrap();
        let listed = store.get_due(user, now, 100, None).await.unwrap();
        assert_eq!(count, listed.len() as i64);
    }

    #[tokio::test]
    async fn test_record_review_appends() {
        let store = test_store().await;
        let now = test_time();
        let user = Uuid::new_v4();
        let question = Uuid::new_v4();

        for grade in [3, 1] {
            store
                .record_review(&ReviewRecord {
                    id: Uuid::new_v4(),
                    user_id: user,
                    question_id: question,
                    review_date: now,
                    grade,
                    elapsed_days: 0.0,
                    scheduled_days: 1.0,
                    state_after: CardState::Learning,
                })
                .await
                .unwrap();
        }

        assert_eq!(store.review_count(user, question).await.unwrap(), 2);
    }
}
