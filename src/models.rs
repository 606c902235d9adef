use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Difficulty assigned to a card before its first review. Replaced by the
/// grade-derived initial difficulty as soon as the card is graded.
pub const DEFAULT_DIFFICULTY: f64 = 5.0;

/// Stability assigned to a card before its first review. Strictly positive so
/// the forgetting-curve math is defined for every stored card.
pub const DEFAULT_STABILITY: f64 = 0.1;

/// Lifecycle stage of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardState {
    New,
    Learning,
    Review,
    Relearning,
}

impl CardState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardState::New => "New",
            CardState::Learning => "Learning",
            CardState::Review => "Review",
            CardState::Relearning => "Relearning",
        }
    }

    pub fn parse(value: &str) -> Option<CardState> {
        match value {
            "New" => Some(CardState::New),
            "Learning" => Some(CardState::Learning),
            "Review" => Some(CardState::Review),
            "Relearning" => Some(CardState::Relearning),
            _ => None,
        }
    }
}

/// Per-(user, question) spaced-repetition state. One row per pair; mutated
/// only by recording a review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub user_id: Uuid,
    pub question_id: Uuid,
    pub state: CardState,
    pub difficulty: f64,
    pub stability: f64,
    pub due_date: DateTime<Utc>,
    pub last_review: Option<DateTime<Utc>>,
    pub reps: i32,
    pub lapses: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// A card as it exists on first exposure: immediately due, never reviewed.
    pub fn new(user_id: Uuid, question_id: Uuid, now: DateTime<Utc>) -> Self {
        Card {
            user_id,
            question_id,
            state: CardState::New,
            difficulty: DEFAULT_DIFFICULTY,
            stability: DEFAULT_STABILITY,
            due_date: now,
            last_review: None,
            reps: 0,
            lapses: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable record of one accepted grading event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub question_id: Uuid,
    pub review_date: DateTime<Utc>,
    pub grade: i32,
    pub elapsed_days: f64,
    pub scheduled_days: f64,
    pub state_after: CardState,
}

/// Resumption point for paging through the due set. Points at the last card
/// of the previous page; the next page starts strictly after it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DueCursor {
    pub due_date: DateTime<Utc>,
    pub question_id: Uuid,
}

impl DueCursor {
    pub fn from_card(card: &Card) -> Self {
        DueCursor {
            due_date: card.due_date,
            question_id: card.question_id,
        }
    }
}
