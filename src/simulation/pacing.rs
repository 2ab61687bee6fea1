//! Optional wall-clock pacing for the virtual clock.
//!
//! When a timescale is configured, the scheduler sleeps before each event until the
//! wall clock catches up with the event's virtual time. One virtual second lasts
//! `factor` real seconds. Pacing is non-strict: when the host falls behind the
//! events simply run late, they are never reordered or skipped.

use std::time::{Duration, Instant};

/// Linear mapping between virtual seconds and host instants.
#[derive(Debug, Clone, Copy)]
pub struct ScaledClock {
    origin_real: Instant, // host reference time
    origin_virtual: f64,  // virtual seconds at origin_real
    factor: f64,          // real seconds per virtual second
}

impl ScaledClock {
    /// Anchor a new clock so that `now_virtual` maps to the current host instant.
    ///
    /// Returns `None` when `factor` is not a positive number, which means "run unpaced".
    pub fn new(factor: f64, now_virtual: f64) -> Option<Self> {
        if !(factor > 0.0) || !factor.is_finite() {
            return None;
        }
        Some(Self { origin_real: Instant::now(), origin_virtual: now_virtual, factor })
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn map_real_to_virtual(&self, real: Instant) -> f64 {
        let real_dt = real.saturating_duration_since(self.origin_real).as_secs_f64();
        self.origin_virtual + real_dt / self.factor
    }

    pub fn map_virtual_to_real(&self, virtual_time: f64) -> Instant {
        let virt_dt = virtual_time - self.origin_virtual;
        // Targets before the origin are already due.
        if !(virt_dt > 0.0) {
            return self.origin_real;
        }
        match Duration::try_from_secs_f64(virt_dt * self.factor) {
            Ok(real_dt) => self.origin_real.checked_add(real_dt).unwrap_or(self.origin_real),
            Err(_) => self.origin_real,
        }
    }

    /// Change the speed factor while keeping the current virtual time continuous.
    ///
    /// Only `origin_real` moves, so already computed deadlines never fall before the origin.
    pub fn set_factor(&mut self, factor: f64) {
        if !(factor > 0.0) || !factor.is_finite() || factor == self.factor {
            return;
        }
        let r_now = Instant::now();
        let v_now_old = self.map_real_to_virtual(r_now);
        let delta_v = (v_now_old - self.origin_virtual).max(0.0);
        let real_elapsed = Duration::try_from_secs_f64(delta_v * factor).unwrap_or(Duration::ZERO);
        self.origin_real = r_now.checked_sub(real_elapsed).unwrap_or(r_now);
        self.factor = factor;
    }

    /// Block the calling thread until the host clock reaches `virtual_time`.
    pub fn wait_until(&self, virtual_time: f64) {
        let target = self.map_virtual_to_real(virtual_time);
        let now = Instant::now();
        if target > now {
            std::thread::sleep(target - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_factor_disables_pacing() {
        assert!(ScaledClock::new(0.0, 0.0).is_none());
        assert!(ScaledClock::new(-1.0, 0.0).is_none());
        assert!(ScaledClock::new(f64::NAN, 0.0).is_none());
        assert!(ScaledClock::new(1.0, 0.0).is_some());
    }

    #[test]
    fn continuity_on_factor_change_preserves_mapping() {
        let mut clock = ScaledClock::new(1.0, 2.0).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let anchor = Instant::now();
        let v_before = clock.map_real_to_virtual(anchor);
        clock.set_factor(0.25);
        let v_after = clock.map_real_to_virtual(anchor);
        // The anchor lies slightly before the rebase instant, so allow a small tolerance.
        assert!((v_after - v_before).abs() < 0.05, "virtual mapping changed too much: {v_before} -> {v_after}");
        assert_eq!(clock.factor(), 0.25);
    }

    #[test]
    fn virtual_to_real_scales_with_factor() {
        let clock = ScaledClock::new(0.5, 0.0).unwrap();
        let now_r = Instant::now();
        let now_v = clock.map_real_to_virtual(now_r);
        let target_r = clock.map_virtual_to_real(now_v + 0.2);
        let real_dt = target_r.saturating_duration_since(now_r).as_secs_f64();
        let expected_secs = 0.2 * 0.5;
        assert!((real_dt - expected_secs).abs() < 0.01, "expected ~{expected_secs}s, got {real_dt}s");
    }

    #[test]
    fn map_virtual_to_real_handles_past_targets() {
        let clock = ScaledClock::new(1.0, 10.0).unwrap();
        let r = clock.map_virtual_to_real(9.0);
        assert_eq!(r, clock.map_virtual_to_real(10.0));
    }
}
