use std::time::Duration;
use tracing::info;

use crate::models::notification::{DispatchOutcome, DispatchResult};

/// Per-run counters. Every field only ever grows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub users_processed: usize,
    pub alerts_checked: usize,
    pub sent: usize,
    /// All unsuccessful sends, invalid tokens included.
    pub failed: usize,
    pub invalid_tokens: usize,
    pub skipped_invalid_data: usize,
    pub skipped_no_position: usize,
    pub skipped_inactive: usize,
    pub lookup_errors: usize,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn record_users(&mut self, users: usize) {
        self.users_processed += users;
    }

    pub fn record_invalid(&mut self) {
        self.skipped_invalid_data += 1;
    }

    pub fn record_inactive(&mut self) {
        self.skipped_inactive += 1;
    }

    pub fn record_checked(&mut self) {
        self.alerts_checked += 1;
    }

    pub fn record_no_position(&mut self) {
        self.skipped_no_position += 1;
    }

    pub fn record_lookup_error(&mut self) {
        self.lookup_errors += 1;
    }

    pub fn record_dispatch(&mut self, outcome: &DispatchOutcome) {
        match outcome.result {
            DispatchResult::Sent(_) => self.sent += 1,
            DispatchResult::Failed(_) => self.failed += 1,
            DispatchResult::InvalidToken => {
                self.failed += 1;
                self.invalid_tokens += 1;
            }
        }
    }

    pub fn finish(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
    }

    pub fn log_summary(&self) {
        info!("{}", "=".repeat(60));
        info!("--- Processing Complete ---");
        info!("Users processed:          {}", self.users_processed);
        info!("Alarms checked:           {}", self.alerts_checked);
        info!("Messages sent:            {}", self.sent);
        info!(
            "Messages failed:          {} (invalid tokens: {})",
            self.failed, self.invalid_tokens
        );
        info!("Skipped (invalid data):   {}", self.skipped_invalid_data);
        info!("Skipped (no position):    {}", self.skipped_no_position);
        info!("Skipped (inactive):       {}", self.skipped_inactive);
        info!("Position lookup errors:   {}", self.lookup_errors);
        info!("Total execution time:     {:.2} seconds", self.elapsed.as_secs_f64());
        info!("{}", "=".repeat(60));
    }
}
