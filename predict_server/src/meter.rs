use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

#[derive(Default)]
pub struct Meter {
    predictions: AtomicU64,
    detections: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            predictions: AtomicU64::new(0),
            detections: AtomicU64::new(0),
        }
    }

    /// Count one served prediction with `detections` objects found.
    pub fn tick_prediction(&self, detections: usize) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
        self.detections.fetch_add(detections as u64, Ordering::Relaxed);
    }

    pub fn get_reset_predictions(&self) -> u64 {
        self.predictions.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_detections(&self) -> u64 {
        self.detections.swap(0, Ordering::Relaxed)
    }
}

pub fn spawn_meter_logger(period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut log_interval = interval(period);
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let predictions = METER.get_reset_predictions();
            let detections = METER.get_reset_detections();
            let elapsed = start.elapsed().as_secs_f32();

            if predictions > 0 {
                let per_second = predictions as f32 / elapsed;
                log::info!(
                    "Predictions per second: {per_second:.2} ({detections} objects detected)"
                );
            }
        }
    })
}

#[cfg(test)]
mod test {
    use super::Meter;

    #[test]
    fn test_meter_counts_and_resets() {
        let meter = Meter::new();
        meter.tick_prediction(3);
        meter.tick_prediction(0);

        assert_eq!(meter.get_reset_predictions(), 2);
        assert_eq!(meter.get_reset_detections(), 3);
        assert_eq!(meter.get_reset_predictions(), 0);
        assert_eq!(meter.get_reset_detections(), 0);
    }
}
