//! Timing of engine and registry operations.

use std::time::Instant;
use tracing::info;

/// Measures one operation on a stage.
#[derive(Debug)]
pub struct StageTimer {
    start: Instant,
    stage: String,
    operation: &'static str,
}

impl StageTimer {
    /// Starts timing `operation` on `stage`.
    #[must_use]
    pub fn start(stage: impl Into<String>, operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            stage: stage.into(),
            operation,
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Logs the duration and returns it in milliseconds.
    #[allow(clippy::must_use_candidate)]
    pub fn finish(self) -> f64 {
        let duration_ms = self.elapsed_ms();
        info!(
            stage = %self.stage,
            operation = self.operation,
            duration_ms,
            "Operation finished"
        );
        duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timer_measures() {
        let timer = StageTimer::start("base", "build");
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(timer.stage(), "base");
        assert!(timer.finish() >= 5.0);
    }
}
