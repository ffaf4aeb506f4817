use log::warn;
use std::time::{Duration, Instant};

/// Accumulates wall-clock time over start/stop episodes.
#[derive(Clone, Debug, Default)]
pub struct Stopwatch {
    episode_start: Option<Instant>,
    last_episode_duration: Duration,
    total_duration: Duration,
}

impl Stopwatch {
    pub fn new() -> Self {
        Stopwatch::default()
    }

    pub fn start(&mut self) {
        if self.episode_start.is_some() {
            warn!("Tried to start a stopwatch that was already running.");
            return;
        }
        self.episode_start = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        let Some(episode_start) = self.episode_start.take() else {
            warn!("Tried to stop a stopwatch that was not running.");
            return;
        };
        self.last_episode_duration = episode_start.elapsed();
        self.total_duration += self.last_episode_duration;
    }

    pub fn last_episode_duration(&self) -> Duration {
        self.last_episode_duration
    }

    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }
}

#[cfg(test)]
mod tests {
    use super::Stopwatch;
    use std::time::Duration;

    #[test]
    fn accumulates_episodes() {
        let mut stopwatch = Stopwatch::new();
        stopwatch.start();
        std::thread::sleep(Duration::from_millis(5));
        stopwatch.stop();
        let first = stopwatch.last_episode_duration();
        assert!(first >= Duration::from_millis(5));

        stopwatch.start();
        stopwatch.stop();
        assert!(stopwatch.total_duration() >= first);
    }

    #[test]
    fn misuse_is_ignored() {
        let mut stopwatch = Stopwatch::new();
        stopwatch.stop();
        assert_eq!(stopwatch.total_duration(), Duration::ZERO);
        stopwatch.start();
        stopwatch.start();
        stopwatch.stop();
    }
}
