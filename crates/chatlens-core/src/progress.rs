/// Observer notified synchronously as a stage advances.
///
/// Implemented for any `FnMut(f64, &str)` closure.
pub trait ProgressObserver {
    fn report(&mut self, fraction: f64, status: &str);
}

impl<F> ProgressObserver for F
where
    F: FnMut(f64, &str),
{
    fn report(&mut self, fraction: f64, status: &str) {
        self(fraction, status)
    }
}

/// Wraps an optional observer and guarantees a non-decreasing sequence of
/// fractions in [0, 1]. Every stage ends with [`Progress::finish`], which
/// reports exactly 1.0.
pub struct Progress<'a> {
    observer: Option<&'a mut dyn ProgressObserver>,
    last: f64,
    stage: &'static str,
}

impl<'a> Progress<'a> {
    pub fn new(stage: &'static str, observer: Option<&'a mut dyn ProgressObserver>) -> Self {
        Self {
            observer,
            last: 0.0,
            stage,
        }
    }

    pub fn report(&mut self, fraction: f64, status: &str) {
        let fraction = if fraction.is_nan() {
            self.last
        } else {
            fraction.clamp(self.last, 1.0)
        };
        self.last = fraction;
        tracing::debug!(stage = self.stage, fraction, "{status}");
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.report(fraction, status);
        }
    }

    /// Report progress through the sub-range [`start`, `end`] of the stage.
    pub fn report_within(&mut self, start: f64, end: f64, done: usize, total: usize, status: &str) {
        let inner = if total == 0 {
            1.0
        } else {
            done as f64 / total as f64
        };
        self.report(start + (end - start) * inner, status);
    }

    pub fn finish(&mut self, status: &str) {
        self.last = 1.0;
        tracing::info!(stage = self.stage, "{status}");
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.report(1.0, status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fractions_are_monotonic_and_end_at_one() {
        let mut seen = Vec::new();
        let mut cb = |f: f64, _: &str| seen.push(f);
        {
            let mut p = Progress::new("test", Some(&mut cb));
            p.report(0.3, "a");
            p.report(0.1, "regress");
            p.report(f64::NAN, "nan");
            p.report(7.0, "overflow");
            p.finish("done");
        }
        assert_eq!(seen, vec![0.3, 0.3, 0.3, 1.0, 1.0]);
    }

    #[test]
    fn test_report_within_maps_subrange() {
        let mut seen = Vec::new();
        let mut cb = |f: f64, _: &str| seen.push(f);
        {
            let mut p = Progress::new("test", Some(&mut cb));
            p.report_within(0.2, 0.6, 1, 2, "half");
            p.report_within(0.6, 0.8, 0, 0, "empty");
        }
        assert!((seen[0] - 0.4).abs() < 1e-12);
        assert!((seen[1] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_without_observer() {
        let mut p = Progress::new("test", None);
        p.report(0.5, "quiet");
        p.finish("done");
    }
}
