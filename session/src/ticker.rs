//! Session clock: authoritative elapsed time, its periodic replication, and
//! the local fixed-cadence network tick.
//!
//! Only the authority advances `elapsed` while a session is running and
//! periodically pushes the integral minutes/seconds to everyone else on the
//! unreliable channel; receivers store the value as a passive mirror. The
//! network tick is purely local bookkeeping on every process.

use shared::SessionSettings;

/// What a single `advance` call produced. The context turns `time_sync`
/// into a broadcast and `network_tick` into a local event.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ClockOutput {
    pub time_sync: Option<(u32, u32)>,
    pub network_tick: Option<f32>,
}

pub struct SessionClock {
    elapsed: f32,
    sync_accum: f32,
    tick_accum: f32,
    sync_interval: f32,
    tick_interval: f32,
}

impl SessionClock {
    pub fn new(sync_interval: f32, tick_interval: f32) -> Self {
        Self {
            elapsed: 0.0,
            sync_accum: 0.0,
            tick_accum: 0.0,
            sync_interval,
            tick_interval,
        }
    }

    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self::new(settings.time_sync_interval, settings.network_tick_interval)
    }

    /// Advances the clock by one frame. `authoritative_elapsed` is true only
    /// on the authority while the session is running; it gates both the
    /// elapsed counter and the replication cadence. The local network tick
    /// accumulates on every process regardless.
    pub fn advance(&mut self, dt: f32, authoritative_elapsed: bool) -> ClockOutput {
        let mut output = ClockOutput::default();

        if authoritative_elapsed {
            self.elapsed += dt;
            self.sync_accum += dt;
            if self.sync_accum >= self.sync_interval {
                self.sync_accum = 0.0;
                output.time_sync = Some(self.minutes_seconds());
            }
        }

        self.tick_accum += dt;
        if self.tick_accum >= self.tick_interval {
            output.network_tick = Some(self.tick_accum);
            self.tick_accum = 0.0;
        }

        output
    }

    /// Overwrites the mirrored elapsed time from a received `TimeSync`.
    /// A dropped or reordered push only causes transient jitter; the next
    /// received value corrects it.
    pub fn mirror(&mut self, minutes: u32, seconds: u32) {
        self.elapsed = (minutes * 60 + seconds) as f32;
    }

    /// Zeroes the clock. Called exactly at session end and on disconnect.
    pub fn reset(&mut self) {
        self.elapsed = 0.0;
        self.sync_accum = 0.0;
        self.tick_accum = 0.0;
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed
    }

    pub fn minutes_seconds(&self) -> (u32, u32) {
        let total = self.elapsed as u32;
        (total / 60, total % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_elapsed_only_advances_when_authoritative() {
        let mut clock = SessionClock::new(1.0, 0.1);

        clock.advance(0.5, false);
        assert_approx_eq!(clock.elapsed_seconds(), 0.0);

        clock.advance(0.5, true);
        assert_approx_eq!(clock.elapsed_seconds(), 0.5);
    }

    #[test]
    fn test_time_sync_fires_at_interval() {
        let mut clock = SessionClock::new(1.0, 10.0);

        assert_eq!(clock.advance(0.4, true).time_sync, None);
        assert_eq!(clock.advance(0.4, true).time_sync, None);
        // 1.2s accumulated, elapsed is 1.2 -> 0 minutes 1 second.
        assert_eq!(clock.advance(0.4, true).time_sync, Some((0, 1)));
        // Accumulator restarted.
        assert_eq!(clock.advance(0.4, true).time_sync, None);
    }

    #[test]
    fn test_time_sync_reports_minutes_and_seconds() {
        let mut clock = SessionClock::new(1.0, 10.0);
        for _ in 0..125 {
            clock.advance(1.0, true);
        }
        assert_eq!(clock.minutes_seconds(), (2, 5));
    }

    #[test]
    fn test_network_tick_carries_accumulated_delta() {
        let mut clock = SessionClock::new(100.0, 0.1);

        assert_eq!(clock.advance(0.06, false).network_tick, None);
        let tick = clock.advance(0.06, false).network_tick;
        assert_approx_eq!(tick.unwrap(), 0.12, 1e-6);
        assert_eq!(clock.advance(0.06, false).network_tick, None);
    }

    #[test]
    fn test_network_tick_fires_on_every_process() {
        let mut clock = SessionClock::new(100.0, 0.1);
        // Non-authoritative processes still get their local cadence.
        assert!(clock.advance(0.2, false).network_tick.is_some());
    }

    #[test]
    fn test_mirror_and_reset() {
        let mut clock = SessionClock::new(1.0, 0.1);
        clock.mirror(3, 15);
        assert_approx_eq!(clock.elapsed_seconds(), 195.0);

        clock.reset();
        assert_approx_eq!(clock.elapsed_seconds(), 0.0);
        assert_eq!(clock.minutes_seconds(), (0, 0));
    }

    #[test]
    fn test_elapsed_monotonic_while_running() {
        let mut clock = SessionClock::new(0.5, 0.1);
        let mut previous = 0.0;
        for _ in 0..50 {
            clock.advance(0.033, true);
            assert!(clock.elapsed_seconds() >= previous);
            previous = clock.elapsed_seconds();
        }
    }
}
