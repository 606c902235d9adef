use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ReviewError;
use crate::models::{Card, CardState};

/// Default FSRS weight vector. W[0..4] are the initial stabilities per grade;
/// the rest parameterize the difficulty and stability update formulas.
pub const DEFAULT_WEIGHTS: [f64; 19] = [
    0.40255, 1.18385, 3.173, 15.69105, 7.1949, 0.5345, 1.4604, 0.0046, 1.54575, 0.1192, 1.01925,
    1.9395, 0.11, 0.29605, 2.2698, 0.2315, 2.9898, 0.51655, 0.6621,
];

// Forgetting curve: R(t, S) = (1 + FACTOR * t / S) ^ DECAY. The factor is
// chosen so that R(S, S) = 0.9, i.e. stability is the interval at which
// recall probability decays to 90%.
const FORGETTING_FACTOR: f64 = 19.0 / 81.0;
const FORGETTING_DECAY: f64 = -0.5;

const MIN_DIFFICULTY: f64 = 1.0;
const MAX_DIFFICULTY: f64 = 10.0;

/// User's self-reported recall quality for one review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl Grade {
    pub fn from_int(value: i32) -> Option<Grade> {
        match value {
            1 => Some(Grade::Again),
            2 => Some(Grade::Hard),
            3 => Some(Grade::Good),
            4 => Some(Grade::Easy),
            _ => None,
        }
    }

    pub fn as_int(self) -> i32 {
        self as i32
    }

    fn as_f64(self) -> f64 {
        self.as_int() as f64
    }
}

/// Derived quantities of one scheduling step, kept for the review log.
#[derive(Debug, Clone)]
pub struct ReviewLog {
    pub elapsed_days: f64,
    pub scheduled_days: f64,
}

/// Tunable scheduling parameters. The weight vector and retention target
/// shape the memory model; the step lists drive the short intra-day intervals
/// used before a card graduates to `Review`.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub desired_retention: f64,
    pub maximum_interval_days: f64,
    pub minimum_stability: f64,
    pub learning_steps: Vec<Duration>,
    pub relearning_steps: Vec<Duration>,
    pub weights: [f64; 19],
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            desired_retention: 0.9,
            maximum_interval_days: 36500.0,
            minimum_stability: 0.01,
            learning_steps: vec![Duration::minutes(10), Duration::hours(1)],
            relearning_steps: vec![Duration::minutes(30)],
            weights: DEFAULT_WEIGHTS,
        }
    }
}

/// Pure review scheduler. Holds only configuration; `schedule` is a
/// deterministic function of (card, grade, now) with no I/O, so callers can
/// replay any review history and get bit-identical results.
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Apply one grading event, returning the successor card. The input card
    /// is never mutated; persisting the result is the caller's job.
    pub fn schedule(
        &self,
        card: &Card,
        grade: Grade,
        now: DateTime<Utc>,
    ) -> Result<(Card, ReviewLog), ReviewError> {
        if let Some(last_review) = card.last_review {
            if now < last_review {
                return Err(ReviewError::OutOfOrderReview { now, last_review });
            }
        }

        let elapsed_days = card
            .last_review
            .map(|last| (now - last).num_seconds() as f64 / 86_400.0)
            .unwrap_or(0.0);
        let retrievability = self.retrievability(elapsed_days, card.stability);

        let (difficulty, stability) = if card.state == CardState::New {
            (self.initial_difficulty(grade), self.initial_stability(grade))
        } else {
            (
                self.next_difficulty(card.difficulty, grade),
                self.next_stability(card.difficulty, card.stability, retrievability, grade),
            )
        };
        let stability = stability.max(self.config.minimum_stability);

        let (state, reps, lapses) = next_state(card, grade);

        let interval = match state {
            CardState::Review => {
                let days = self.next_interval_days(stability);
                Duration::days(days as i64)
            }
            CardState::Relearning => self.step_interval(&self.config.relearning_steps, grade, reps),
            _ => self.step_interval(&self.config.learning_steps, grade, reps),
        };

        let updated = Card {
            user_id: card.user_id,
            question_id: card.question_id,
            state,
            difficulty,
            stability,
            due_date: now + interval,
            last_review: Some(now),
            reps,
            lapses,
            created_at: card.created_at,
            updated_at: now,
        };
        let log = ReviewLog {
            elapsed_days,
            scheduled_days: interval.num_seconds() as f64 / 86_400.0,
        };

        Ok((updated, log))
    }

    /// Estimated recall probability after `elapsed_days` at the given stability.
    pub fn retrievability(&self, elapsed_days: f64, stability: f64) -> f64 {
        if elapsed_days <= 0.0 {
            1.0
        } else {
            (1.0 + FORGETTING_FACTOR * elapsed_days / stability).powf(FORGETTING_DECAY)
        }
    }

    /// Interval at which retrievability decays to the retention target,
    /// rounded to whole days and clamped to the configured maximum.
    fn next_interval_days(&self, stability: f64) -> f64 {
        let days = (stability / FORGETTING_FACTOR)
            * (self.config.desired_retention.powf(1.0 / FORGETTING_DECAY) - 1.0);
        days.round().clamp(1.0, self.config.maximum_interval_days)
    }

    /// Short intra-day interval for cards in `Learning`/`Relearning`. `Again`
    /// restarts at the first step; successes walk the list by success count.
    fn step_interval(&self, steps: &[Duration], grade: Grade, reps: i32) -> Duration {
        let index = if grade == Grade::Again {
            0
        } else {
            (reps.max(0) as usize).min(steps.len().saturating_sub(1))
        };
        steps.get(index).copied().unwrap_or(Duration::days(1))
    }

    fn initial_stability(&self, grade: Grade) -> f64 {
        let w = &self.config.weights;
        match grade {
            Grade::Again => w[0],
            Grade::Hard => w[1],
            Grade::Good => w[2],
            Grade::Easy => w[3],
        }
    }

    fn initial_difficulty(&self, grade: Grade) -> f64 {
        let w = &self.config.weights;
        let d = w[4] - (w[5] * (grade.as_f64() - 1.0)).exp() + 1.0;
        d.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
    }

    /// Difficulty update: shifted by the grade, then mean-reverted toward the
    /// initial difficulty of an `Easy` first rating.
    fn next_difficulty(&self, difficulty: f64, grade: Grade) -> f64 {
        let w = &self.config.weights;
        let delta = -w[6] * (grade.as_f64() - 3.0);
        let shifted = difficulty + delta * ((MAX_DIFFICULTY - difficulty) / 9.0);
        let reverted = w[7] * self.initial_difficulty(Grade::Easy) + (1.0 - w[7]) * shifted;
        reverted.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
    }

    fn next_stability(
        &self,
        difficulty: f64,
        stability: f64,
        retrievability: f64,
        grade: Grade,
    ) -> f64 {
        if grade == Grade::Again {
            self.stability_after_lapse(difficulty, stability, retrievability)
        } else {
            self.stability_after_recall(difficulty, stability, retrievability, grade)
        }
    }

    /// Stability growth on successful recall. Harder items grow faster when
    /// recalled; recalls close to forgetting (low retrievability) count more.
    fn stability_after_recall(
        &self,
        difficulty: f64,
        stability: f64,
        retrievability: f64,
        grade: Grade,
    ) -> f64 {
        let w = &self.config.weights;
        let difficulty_term = 11.0 - difficulty;
        let stability_term = stability.powf(-w[9]);
        let recall_term = (w[10] * (1.0 - retrievability)).exp() - 1.0;
        let hard_penalty = if grade == Grade::Hard { w[15] } else { 1.0 };
        let easy_bonus = if grade == Grade::Easy { w[16] } else { 1.0 };
        let growth =
            1.0 + difficulty_term * stability_term * recall_term * hard_penalty * easy_bonus
                * w[8].exp();
        stability * growth
    }

    /// Post-lapse stability, capped at the pre-lapse value.
    fn stability_after_lapse(
        &self,
        difficulty: f64,
        stability: f64,
        retrievability: f64,
    ) -> f64 {
        let w = &self.config.weights;
        let next = w[11]
            * difficulty.powf(-w[12])
            * ((stability + 1.0).powf(w[13]) - 1.0)
            * (w[14] * (1.0 - retrievability)).exp();
        next.min(stability)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

/// State-machine step for one grading event. Always leaves `New`, so a stored
/// `New` card can only ever carry zero reps and zero lapses. `Again` counts as
/// a lapse only once the card has left `New`.
fn next_state(card: &Card, grade: Grade) -> (CardState, i32, i32) {
    match (card.state, grade) {
        (CardState::New, Grade::Again) => (CardState::Learning, card.reps, card.lapses),
        (CardState::New, Grade::Easy) => (CardState::Review, card.reps + 1, card.lapses),
        (CardState::New, _) => (CardState::Learning, card.reps + 1, card.lapses),

        (CardState::Learning, Grade::Again) => (CardState::Learning, card.reps, card.lapses + 1),
        (CardState::Learning, Grade::Hard) => (CardState::Learning, card.reps + 1, card.lapses),
        (CardState::Learning, _) => (CardState::Review, card.reps + 1, card.lapses),

        (CardState::Review, Grade::Again) => (CardState::Relearning, card.reps, card.lapses + 1),
        (CardState::Review, _) => (CardState::Review, card.reps + 1, card.lapses),

        (CardState::Relearning, Grade::Again) => {
            (CardState::Relearning, card.reps, card.lapses + 1)
        }
        (CardState::Relearning, Grade::Hard) => {
            (CardState::Relearning, card.reps + 1, card.lapses)
        }
        (CardState::Relearning, _) => (CardState::Review, card.reps + 1, card.lapses),
    }
}
