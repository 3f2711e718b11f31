//! Clock and movement collaborators.

use std::time::Instant;

use glam::DVec2;

/// Monotonic time source in seconds.
pub trait MonotonicClock {
    fn now(&self) -> f64;
}

/// Source of the steering vector sent to the server.
pub trait MovementSource {
    /// Current direction. `DVec2::ZERO` means no input.
    fn direction(&self) -> DVec2;
}

/// [`MonotonicClock`] counting seconds since construction.
#[derive(Debug, Clone, Copy)]
pub struct SteadyClock {
    origin: Instant,
}

impl SteadyClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SteadyClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SteadyClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A fixed vector is its own movement source.
impl MovementSource for DVec2 {
    fn direction(&self) -> DVec2 {
        *self
    }
}

/// Virtual joystick: an angle plus an intensity in `[0, 1]`.
///
/// The direction is `(cos angle, sin angle) * intensity` while the stick is
/// held and zero once it is released.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StickInput {
    angle: f64,
    intensity: f64,
    active: bool,
}

impl StickInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the stick at `angle` radians with `intensity`, clamped to
    /// `[0, 1]`. Non-finite input is ignored.
    pub fn push(&mut self, angle: f64, intensity: f64) {
        if !angle.is_finite() || !intensity.is_finite() {
            return;
        }
        self.angle = angle;
        self.intensity = intensity.clamp(0.0, 1.0);
        self.active = true;
    }

    /// Hold the stick at `offset` from its centre. Distances beyond `range`
    /// saturate at full intensity.
    pub fn drag(&mut self, offset: DVec2, range: f64) {
        if range <= 0.0 {
            return;
        }
        let distance = offset.length().min(range);
        self.push(offset.y.atan2(offset.x), distance / range);
    }

    /// Let go of the stick. The last angle is kept.
    pub fn release(&mut self) {
        self.active = false;
        self.intensity = 0.0;
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn angle_degrees(&self) -> f64 {
        self.angle.to_degrees()
    }

    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl MovementSource for StickInput {
    fn direction(&self) -> DVec2 {
        if !self.active || self.intensity == 0.0 {
            return DVec2::ZERO;
        }
        DVec2::from_angle(self.angle) * self.intensity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_released_stick_is_zero() {
        let mut stick = StickInput::new();
        assert_eq!(stick.direction(), DVec2::ZERO);

        stick.push(1.0, 0.5);
        stick.release();
        assert_eq!(stick.direction(), DVec2::ZERO);
        assert_eq!(stick.angle(), 1.0);
    }

    #[test]
    fn test_push_scales_unit_vector() {
        let mut stick = StickInput::new();
        stick.push(FRAC_PI_2, 0.5);
        let dir = stick.direction();
        assert!(dir.x.abs() < 1e-12);
        assert!((dir.y - 0.5).abs() < 1e-12);

        stick.push(0.0, 4.0);
        assert_eq!(stick.intensity(), 1.0);
        assert!((stick.direction() - DVec2::X).length() < 1e-12);
    }

    #[test]
    fn test_drag_saturates_at_range() {
        let mut stick = StickInput::new();
        stick.drag(DVec2::new(0.0, -20.0), 40.0);
        assert!((stick.intensity() - 0.5).abs() < 1e-12);
        assert!((stick.angle_degrees() + 90.0).abs() < 1e-9);

        stick.drag(DVec2::new(300.0, 0.0), 40.0);
        assert_eq!(stick.intensity(), 1.0);
    }

    #[test]
    fn test_non_finite_push_ignored() {
        let mut stick = StickInput::new();
        stick.push(f64::NAN, 1.0);
        assert!(!stick.is_active());
    }

    #[test]
    fn test_steady_clock_is_monotonic() {
        let clock = SteadyClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a && a >= 0.0);
    }
}
