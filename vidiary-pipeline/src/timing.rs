use std::time::Instant;

use tracing::info;

use vidiary_core::{Stage, StageTimings};

/// Wall-clock timer for one stage.
///
/// Start before the stage, finish after, on the success and failure paths
/// alike, so a stage that raises still leaves its partial elapsed time in
/// the map.
pub struct StageClock {
    stage: Stage,
    start: Instant,
}

impl StageClock {
    pub fn start(stage: Stage) -> Self {
        Self {
            stage,
            start: Instant::now(),
        }
    }

    /// Record elapsed milliseconds into `timings` and return them.
    pub fn finish(self, timings: &mut StageTimings) -> u64 {
        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        timings.record(self.stage, elapsed_ms);
        info!(stage = %self.stage, elapsed_ms, "stage_timing");
        elapsed_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_records_elapsed() {
        let mut timings = StageTimings::new();
        let clock = StageClock::start(Stage::Download);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let elapsed = clock.finish(&mut timings);
        assert!(elapsed >= 5);
        assert_eq!(timings.get(Stage::Download), Some(elapsed));
    }
}
