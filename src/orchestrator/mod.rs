pub mod core;


pub use self::core::{
    UpdateOptions, UpdateOrchestrator, UpdateOutcome, CLOSE_DELAY_MS, UPDATE_CHECK_INTERVAL_SECS,
};
