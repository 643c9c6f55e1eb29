/// Seconds left until ready; never negative.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CountdownTimer {
    remaining: f32,
}

impl CountdownTimer {
    pub const fn ready() -> Self {
        Self { remaining: 0.0 }
    }

    pub fn started(seconds: f32) -> Self {
        let mut timer = Self::ready();
        timer.start(seconds);
        timer
    }

    pub fn start(&mut self, seconds: f32) {
        self.remaining = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    }

    /// Restarts only if `seconds` is longer than what is left.
    pub fn extend_to(&mut self, seconds: f32) {
        if seconds.is_finite() && seconds > self.remaining {
            self.remaining = seconds;
        }
    }

    pub fn tick(&mut self, dt: f32) {
        self.remaining = (self.remaining - dt.max(0.0)).max(0.0);
    }

    pub fn clear(&mut self) {
        self.remaining = 0.0;
    }

    pub fn is_ready(&self) -> bool {
        self.remaining <= 0.0
    }

    pub fn remaining(&self) -> f32 {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_down_and_floors_at_zero() {
        let mut timer = CountdownTimer::started(1.0);
        assert!(!timer.is_ready());
        timer.tick(0.4);
        assert!((timer.remaining() - 0.6).abs() < 1e-6);
        timer.tick(5.0);
        assert_eq!(timer.remaining(), 0.0);
        assert!(timer.is_ready());
    }

    #[test]
    fn extend_never_shortens() {
        let mut timer = CountdownTimer::started(3.0);
        timer.extend_to(1.0);
        assert!((timer.remaining() - 3.0).abs() < 1e-6);
        timer.extend_to(4.5);
        assert!((timer.remaining() - 4.5).abs() < 1e-6);
    }

    #[test]
    fn invalid_durations_are_ready() {
        assert!(CountdownTimer::started(-2.0).is_ready());
        assert!(CountdownTimer::started(f32::NAN).is_ready());
        let mut timer = CountdownTimer::started(1.0);
        timer.tick(-1.0);
        assert!((timer.remaining() - 1.0).abs() < 1e-6);
    }
}
