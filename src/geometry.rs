//! Terminal width tracking for full-width separator lines.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How often the terminal size is looked at again.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

const FALLBACK_WIDTH: usize = 80;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TerminalGeometry {
    width: usize,
    separator_line: String,
}

impl TerminalGeometry {
    pub fn with_width(width: usize) -> Self {
        TerminalGeometry {
            width,
            separator_line: "-".repeat(width),
        }
    }

    /// Queries the controlling terminal, falling back to `$COLUMNS` and then
    /// to 80 columns.
    pub fn detect() -> Self {
        let width = crossterm::terminal::size()
            .ok()
            .map(|(cols, _rows)| usize::from(cols))
            .filter(|cols| *cols > 0)
            .or_else(|| {
                std::env::var("COLUMNS")
                    .ok()
                    .and_then(|cols| cols.trim().parse().ok())
                    .filter(|cols| *cols > 0)
            })
            .unwrap_or(FALLBACK_WIDTH);

        TerminalGeometry::with_width(width)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// A line of dashes exactly `width` wide.
    pub fn separator_line(&self) -> &str {
        &self.separator_line
    }
}

/// Keeps a [`TerminalGeometry`] up to date in the background.
#[derive(Debug)]
pub struct GeometryTracker {
    current: watch::Receiver<TerminalGeometry>,
    task: Option<JoinHandle<()>>,
}

impl GeometryTracker {
    /// Detects the geometry now, then again every [`REFRESH_INTERVAL`].
    pub fn spawn() -> Self {
        let (tx, current) = watch::channel(TerminalGeometry::detect());

        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(REFRESH_INTERVAL);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticks.tick().await;
                let geometry = TerminalGeometry::detect();
                tx.send_if_modified(|current| {
                    if *current == geometry {
                        false
                    } else {
                        tracing::debug!(width = geometry.width(), "terminal resized");
                        *current = geometry;
                        true
                    }
                });
                if tx.is_closed() {
                    break;
                }
            }
        });

        GeometryTracker {
            current,
            task: Some(task),
        }
    }

    /// A tracker that never changes, for output that is not a terminal.
    pub fn fixed(geometry: TerminalGeometry) -> Self {
        let (_tx, current) = watch::channel(geometry);

        GeometryTracker {
            current,
            task: None,
        }
    }

    /// The most recent geometry. Do not hold across an `.await`.
    pub fn current(&self) -> watch::Ref<'_, TerminalGeometry> {
        self.current.borrow()
    }
}

impl Drop for GeometryTracker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separator_matches_width() {
        let geometry = TerminalGeometry::with_width(12);
        assert_eq!(geometry.width(), 12);
        assert_eq!(geometry.separator_line(), "------------");

        assert_eq!(TerminalGeometry::with_width(0).separator_line(), "");
    }

    #[test]
    fn test_detect_is_consistent() {
        let geometry = TerminalGeometry::detect();
        assert!(geometry.width() > 0);
        assert_eq!(geometry.separator_line().len(), geometry.width());
    }

    #[tokio::test]
    async fn test_fixed_tracker() {
        let tracker = GeometryTracker::fixed(TerminalGeometry::with_width(5));
        assert_eq!(tracker.current().separator_line(), "-----");
    }

    #[tokio::test]
    async fn test_spawned_tracker_has_geometry() {
        let tracker = GeometryTracker::spawn();
        assert!(tracker.current().width() > 0);
    }
}
