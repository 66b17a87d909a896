//! Progress recording observers

use parrot_v2w::ProgressObserver;
use std::sync::{Arc, Mutex};

/// Records every progress value it receives
#[derive(Debug, Clone, Default)]
pub struct ProgressRecorder {
    values: Arc<Mutex<Vec<f64>>>,
}

impl ProgressRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> Vec<f64> {
        self.values.lock().unwrap().clone()
    }

    pub fn observer(&self) -> Arc<dyn ProgressObserver> {
        Arc::new(self.clone())
    }
}

impl ProgressObserver for ProgressRecorder {
    fn on_progress(&self, progress: f64) {
        self.values.lock().unwrap().push(progress);
    }
}

/// Values never decrease, stay in [0, 1] and end with exactly one 1.0
pub fn assert_progress_completed(values: &[f64]) {
    assert!(!values.is_empty(), "no progress reported");
    for pair in values.windows(2) {
        assert!(pair[1] >= pair[0], "progress decreased: {:?}", pair);
    }
    assert!(values.iter().all(|p| (0.0..=1.0).contains(p)));
    assert_eq!(*values.last().unwrap(), 1.0);
    assert_eq!(values.iter().filter(|p| **p == 1.0).count(), 1);
}
