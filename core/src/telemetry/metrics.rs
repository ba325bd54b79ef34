use std::sync::Mutex;

/// Batch counters shared between session workers.
pub struct MetricsRecorder {
    inner: Mutex<Metrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub processed_sessions: usize,
    pub failed_sessions: usize,
    pub quarantined_frames: usize,
    pub corrected_frames: usize,
}

#[derive(Default)]
struct Metrics {
    processed_sessions: usize,
    failed_sessions: usize,
    quarantined_frames: usize,
    corrected_frames: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics::default()),
        }
    }

    pub fn record_processed(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.processed_sessions += 1;
        }
    }

    pub fn record_error(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.failed_sessions += 1;
        }
    }

    pub fn record_quarantined(&self, frames: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.quarantined_frames += frames;
        }
    }

    pub fn record_corrected(&self, frames: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.corrected_frames += frames;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            MetricsSnapshot {
                processed_sessions: metrics.processed_sessions,
                failed_sessions: metrics.failed_sessions,
                quarantined_frames: metrics.quarantined_frames,
                corrected_frames: metrics.corrected_frames,
            }
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counters_accumulate_across_threads() {
        let recorder = Arc::new(MetricsRecorder::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let recorder = Arc::clone(&recorder);
                thread::spawn(move || {
                    recorder.record_processed();
                    recorder.record_quarantined(2);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        recorder.record_error();

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.processed_sessions, 4);
        assert_eq!(snapshot.quarantined_frames, 8);
        assert_eq!(snapshot.failed_sessions, 1);
    }
}
