pub mod api;
pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod review_service;
pub mod scheduler;
pub mod store;

pub use config::Config;
pub use errors::{ApiError, ReviewError};
pub use models::{Card, CardState, DueCursor, ReviewRecord};
pub use review_service::ReviewService;
pub use scheduler::{Grade, Scheduler, SchedulerConfig};
pub use store::CardStore;
