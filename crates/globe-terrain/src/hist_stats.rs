//! Sliding-window peak tracker for per-frame touch counts.

/// Tracks the maximum of the last `window` values pushed into it.
///
/// The window starts filled with zeros. Updates are O(1) except when the
/// value leaving the window was the current maximum, which triggers a rescan.
#[derive(Clone, Debug)]
pub struct HistStats {
    history: Vec<usize>,
    cursor: usize,
    max: usize,
}

impl Default for HistStats {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

impl HistStats {
    /// Frames of history kept by default.
    pub const DEFAULT_WINDOW: usize = 200;

    /// Create a tracker over the last `window` values (at least one).
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            history: vec![0; window.max(1)],
            cursor: 0,
            max: 0,
        }
    }

    /// Push `value` and return the maximum over the trailing window,
    /// including `value`.
    pub fn get_max(&mut self, value: usize) -> usize {
        let evicted = std::mem::replace(&mut self.history[self.cursor], value);
        self.cursor = (self.cursor + 1) % self.history.len();

        if value >= self.max {
            self.max = value;
        } else if evicted == self.max {
            self.max = self.history.iter().copied().max().unwrap_or(0);
        }
        self.max
    }

    /// Current window maximum without pushing a value.
    #[must_use]
    pub fn max(&self) -> usize {
        self.max
    }

    #[must_use]
    pub fn window(&self) -> usize {
        self.history.len()
    }
}
