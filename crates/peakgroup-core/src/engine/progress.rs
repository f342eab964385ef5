/// Events a sampling run emits so a front end can draw its progress.
///
/// A run is a sequence of named phases (precomputation, burn-in, sampling).
/// Inside a phase, `TaskStart` announces how many increments to expect.
/// `SweepFinished` follows every Gibbs sweep with the current number of
/// clusters and the state's log-posterior, which lets a bar show how the
/// chain is mixing without access to the state itself.
#[derive(Debug, Clone)]
pub enum Progress {
    PhaseStart { name: &'static str },
    PhaseFinish,

    TaskStart { total_steps: u64 },
    TaskIncrement,
    TaskFinish,

    SweepFinished { clusters: usize, score: f64 },

    Message(String),
}

/// Receives every [`Progress`] event; it may be called from rayon workers
/// during the precomputation.
pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

/// Forwards sampler events to an optional callback. Library callers that do
/// not care about progress pass [`ProgressReporter::new`], which drops
/// everything.
#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }

    /// Brackets the events `f` reports with `PhaseStart { name }` and
    /// `PhaseFinish`, returning whatever `f` returns.
    pub fn phase<T>(&self, name: &'static str, f: impl FnOnce() -> T) -> T {
        self.report(Progress::PhaseStart { name });
        let result = f();
        self.report(Progress::PhaseFinish);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn phase_wraps_work_in_start_and_finish_events() {
        let events = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|e| {
            events.lock().unwrap().push(format!("{:?}", e));
        }));

        let value = reporter.phase("Precomputation", || {
            reporter.report(Progress::SweepFinished { clusters: 4, score: -12.5 });
            7
        });
        drop(reporter);

        assert_eq!(value, 7);
        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 3);
        assert!(events[0].contains("Precomputation"));
        assert!(events[1].contains("clusters: 4"));
        assert_eq!(events[2], "PhaseFinish");
    }

    #[test]
    fn reporter_without_callback_is_silent() {
        let reporter = ProgressReporter::new();
        reporter.report(Progress::TaskIncrement);
    }
}
