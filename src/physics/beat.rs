// Beat kinematics - oscillator moving along the beats of a meter
//
// The position is measured in beats and wraps at the beat count of the
// meter. Tempo changes are driven by forces computed by the kinematics
// solver: a constant force for accelerations toward a target tempo and a
// linear force for phase synchronizations.

use super::kinematics::{self, Force, Motion};

const SECONDS_PER_MINUTE: f64 = 60.0;

/// Remaining force time below this is considered exhausted (seconds)
const FORCE_TIME_EPSILON: f64 = 1e-9;

/// Converts a tempo (BPM) into a velocity (beats/s)
#[inline]
pub fn bpm_to_velocity(bpm: f64) -> f64 {
    bpm / SECONDS_PER_MINUTE
}

/// Converts a velocity (beats/s) into a tempo (BPM)
#[inline]
pub fn velocity_to_bpm(velocity: f64) -> f64 {
    velocity * SECONDS_PER_MINUTE
}

/// Converts an acceleration (BPM/min) into beats/s²
#[inline]
pub fn bpm_per_min_to_accel(accel: f64) -> f64 {
    accel / (SECONDS_PER_MINUTE * SECONDS_PER_MINUTE)
}

/// Converts an acceleration (beats/s²) into BPM/min
#[inline]
pub fn accel_to_bpm_per_min(accel: f64) -> f64 {
    accel * SECONDS_PER_MINUTE * SECONDS_PER_MINUTE
}

/// What the currently applied force is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceMode {
    None,
    Accel,
    Sync,
}

#[derive(Debug, Clone)]
pub struct BeatKinematics {
    /// Modulus of the position (0 = no wrapping)
    beats: f64,
    motion: Motion,

    force: Force,
    /// Remaining time of the active force (seconds)
    force_time: f64,
    mode: ForceMode,

    // acceleration program (beats/s, beats/s²)
    target: f64,
    accel: f64,

    // synchronization program (beats/s)
    sync_start_velocity: f64,
    sync_velocity_dev: f64,
}

impl BeatKinematics {
    pub fn new() -> Self {
        Self {
            beats: 0.0,
            motion: Motion::default(),
            force: Force::default(),
            force_time: 0.0,
            mode: ForceMode::None,
            target: 0.0,
            accel: 0.0,
            sync_start_velocity: 0.0,
            sync_velocity_dev: 0.0,
        }
    }

    /// Back to position 0, standing still, no force
    pub fn reset(&mut self) {
        let beats = self.beats;
        *self = Self::new();
        self.beats = beats;
    }

    /// Current position in beats (`0 <= position < beats`)
    pub fn position(&self) -> f64 {
        self.motion.position
    }

    /// Current tempo in BPM
    pub fn tempo(&self) -> f64 {
        velocity_to_bpm(self.motion.velocity)
    }

    /// Current acceleration in BPM/min
    pub fn acceleration(&self) -> f64 {
        if self.force_time > 0.0 {
            accel_to_bpm_per_min(self.force.base)
        } else {
            0.0
        }
    }

    pub fn beats(&self) -> f64 {
        self.beats
    }

    pub fn mode(&self) -> ForceMode {
        self.mode
    }

    pub fn is_accelerating(&self) -> bool {
        self.mode == ForceMode::Accel && self.force_time > 0.0
    }

    pub fn is_synchronizing(&self) -> bool {
        self.mode == ForceMode::Sync && self.force_time > 0.0
    }

    /// Changes the modulus of the position
    ///
    /// With `turnover` a position beyond the new beat count keeps its
    /// fractional part but is moved onto the last beat instead of wrapping
    /// into the next bar.
    pub fn set_beats(&mut self, beats: usize, turnover: bool) {
        let beats = beats as f64;
        let position = self.motion.position;

        if turnover && beats > 0.0 && position >= beats {
            self.motion.position = beats - 1.0 + position.fract();
        }
        self.beats = beats;
        self.wrap();
    }

    /// Sets the tempo directly and drops any active force
    pub fn set_tempo(&mut self, bpm: f64) {
        self.motion.velocity = bpm_to_velocity(bpm);
        self.clear_force();
    }

    /// Accelerates toward `target_bpm` with `accel` BPM/min
    ///
    /// Calling this again while accelerating recomputes the force from the
    /// current tempo, so edits of target or acceleration take effect
    /// without restarting the ramp.
    pub fn accelerate(&mut self, accel: f64, target_bpm: f64) {
        self.target = bpm_to_velocity(target_bpm);
        self.accel = bpm_per_min_to_accel(accel);

        let (force, time) =
            kinematics::compute_accel_force(self.target - self.motion.velocity, self.accel);

        if time > 0.0 {
            self.force = force;
            self.force_time = time;
            self.mode = ForceMode::Accel;
        } else {
            self.clear_force();
        }
    }

    /// Corrects a phase deviation of `beat_dev` beats and a tempo deviation
    /// of `tempo_dev` BPM within `time` seconds
    pub fn synchronize(&mut self, beat_dev: f64, tempo_dev: f64, time: f64) {
        let velocity_dev = bpm_to_velocity(tempo_dev);

        if time <= 0.0 {
            self.clear_force();
            self.motion.position += beat_dev;
            self.motion.velocity += velocity_dev;
            self.wrap();
            return;
        }

        self.sync_start_velocity = self.motion.velocity;
        self.sync_velocity_dev = velocity_dev;
        self.force = kinematics::compute_sync_force(beat_dev, velocity_dev, time);
        self.force_time = time;
        self.mode = ForceMode::Sync;
    }

    pub fn stop_acceleration(&mut self) {
        if self.mode == ForceMode::Accel {
            self.clear_force();
        }
    }

    pub fn stop_synchronization(&mut self) {
        if self.mode == ForceMode::Sync {
            self.clear_force();
        }
    }

    /// Advances the oscillator by `time` seconds
    pub fn step(&mut self, time: f64) {
        if time <= 0.0 {
            return;
        }
        let mut remaining = time;

        if self.force_time > 0.0 {
            if remaining + FORCE_TIME_EPSILON >= self.force_time {
                let t = self.force_time;
                self.motion = kinematics::integrate(self.motion, &self.force, t);
                remaining = (remaining - t).max(0.0);

                // snap to the exact target to get rid of accumulated rounding
                match self.mode {
                    ForceMode::Accel => self.motion.velocity = self.target,
                    ForceMode::Sync => {
                        self.motion.velocity = self.sync_start_velocity + self.sync_velocity_dev
                    }
                    ForceMode::None => {}
                }
                self.clear_force();
            } else {
                self.motion = kinematics::integrate(self.motion, &self.force, remaining);
                self.force = self.force.shifted(remaining);
                self.force_time -= remaining;
                remaining = 0.0;
            }
        }

        if remaining > 0.0 {
            self.motion.position += self.motion.velocity * remaining;
        }

        self.wrap();
    }

    /// Time in seconds until the position has advanced by `distance` beats
    ///
    /// Takes the remaining force phase into account followed by motion at
    /// constant velocity. Returns `f64::INFINITY` if the distance can never
    /// be covered.
    pub fn arrival(&self, distance: f64) -> f64 {
        if distance <= 0.0 {
            return 0.0;
        }

        let start = Motion {
            position: 0.0,
            velocity: self.motion.velocity,
        };

        let mut elapsed = 0.0;
        let mut motion = start;

        if self.force_time > 0.0 {
            let t = kinematics::arrival(start, distance, &self.force, self.force_time);
            if t < self.force_time {
                return t;
            }
            elapsed = self.force_time;
            motion = kinematics::integrate(start, &self.force, self.force_time);
        }

        let rest = distance - motion.position;
        if rest <= 0.0 {
            return elapsed;
        }
        if motion.velocity <= 0.0 {
            return f64::INFINITY;
        }
        elapsed + rest / motion.velocity
    }

    fn clear_force(&mut self) {
        self.force = Force::default();
        self.force_time = 0.0;
        self.mode = ForceMode::None;
    }

    fn wrap(&mut self) {
        if self.beats > 0.0 {
            let mut p = self.motion.position.rem_euclid(self.beats);
            if p >= self.beats {
                p = 0.0;
            }
            self.motion.position = p;
        }
    }
}

impl Default for BeatKinematics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const EPSILON: f64 = 1e-9;

    fn oscillator(beats: usize, bpm: f64) -> BeatKinematics {
        let mut osc = BeatKinematics::new();
        osc.set_beats(beats, false);
        osc.set_tempo(bpm);
        osc
    }

    #[test]
    fn test_constant_tempo_stepping() {
        let mut osc = oscillator(4, 120.0);
        osc.step(0.5);
        assert!((osc.position() - 1.0).abs() < EPSILON);
        osc.step(1.75);
        assert!((osc.position() - 0.5).abs() < EPSILON); // 4.5 mod 4
    }

    #[test]
    fn test_position_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut osc = oscillator(3, 97.0);
        osc.accelerate(500.0, 180.0);

        for i in 0..10_000 {
            if i % 1000 == 0 {
                osc.synchronize(rng.gen_range(-0.5..0.5), 0.0, rng.gen_range(0.0..0.3));
            }
            osc.step(rng.gen_range(0.0..0.08));
            assert!(osc.position() >= 0.0 && osc.position() < 3.0);
        }
    }

    #[test]
    fn test_acceleration_reaches_target_exactly() {
        // 10 BPM/s = 600 BPM/min, 120 -> 140 takes 2s
        let mut osc = oscillator(4, 120.0);
        osc.accelerate(600.0, 140.0);
        assert!(osc.is_accelerating());
        assert!((osc.acceleration() - 600.0).abs() < 1e-6);

        for _ in 0..40 {
            osc.step(0.05);
        }
        assert!((osc.tempo() - 140.0).abs() < EPSILON);
        assert!(!osc.is_accelerating());
        assert_eq!(osc.mode(), ForceMode::None);

        osc.step(1.0);
        assert!((osc.tempo() - 140.0).abs() < EPSILON);
    }

    #[test]
    fn test_acceleration_never_overshoots() {
        let mut osc = oscillator(4, 120.0);
        osc.accelerate(600.0, 140.0);
        for _ in 0..30 {
            osc.step(0.1);
            assert!(osc.tempo() <= 140.0 + EPSILON);
        }
    }

    #[test]
    fn test_deceleration() {
        let mut osc = oscillator(4, 120.0);
        osc.accelerate(1200.0, 100.0);
        osc.step(0.5);
        assert!((osc.tempo() - 110.0).abs() < 1e-6);
        osc.step(5.0);
        assert!((osc.tempo() - 100.0).abs() < EPSILON);
    }

    #[test]
    fn test_synchronization_shifts_phase() {
        let mut osc = oscillator(4, 120.0);
        osc.step(0.3);
        let start = osc.position();

        osc.synchronize(0.25, 0.0, 1.0);
        assert!(osc.is_synchronizing());
        for _ in 0..10 {
            osc.step(0.1);
        }

        let expected = (start + 2.0 + 0.25).rem_euclid(4.0);
        assert!((osc.position() - expected).abs() < 1e-6);
        assert!((osc.tempo() - 120.0).abs() < EPSILON);
        assert!(!osc.is_synchronizing());
    }

    #[test]
    fn test_synchronization_with_tempo_deviation() {
        let mut osc = oscillator(4, 120.0);
        osc.synchronize(-0.1, 6.0, 0.5);
        osc.step(0.5);
        assert!((osc.tempo() - 126.0).abs() < EPSILON);
        assert!((osc.position() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_synchronization_without_time_is_instant() {
        let mut osc = oscillator(4, 120.0);
        osc.synchronize(0.5, 12.0, 0.0);
        assert!((osc.position() - 0.5).abs() < EPSILON);
        assert!((osc.tempo() - 132.0).abs() < EPSILON);
        assert_eq!(osc.mode(), ForceMode::None);
    }

    #[test]
    fn test_stop_only_matching_mode() {
        let mut osc = oscillator(4, 120.0);
        osc.accelerate(600.0, 140.0);
        osc.stop_synchronization();
        assert!(osc.is_accelerating());
        osc.stop_acceleration();
        assert!(!osc.is_accelerating());
    }

    #[test]
    fn test_arrival_constant_velocity() {
        let osc = oscillator(4, 120.0);
        assert!((osc.arrival(1.0) - 0.5).abs() < EPSILON);
        assert_eq!(osc.arrival(0.0), 0.0);
    }

    #[test]
    fn test_arrival_infinite_when_standing() {
        let osc = oscillator(4, 0.0);
        assert!(osc.arrival(1.0).is_infinite());
    }

    #[test]
    fn test_arrival_matches_stepping_under_force() {
        let mut osc = oscillator(16, 60.0);
        osc.accelerate(3600.0, 120.0); // 1 beat/s², 1 -> 2 beats/s within 1s

        // within the force phase: t + t²/2 = 0.5 => t = sqrt(2) - 1
        let t = osc.arrival(0.5);
        assert!((t - (2f64.sqrt() - 1.0)).abs() < 1e-9);

        // beyond the force phase: 1.5 beats in the first second, then 2 beats/s
        let t = osc.arrival(3.5);
        assert!((t - 2.0).abs() < 1e-9);

        osc.step(t);
        assert!((osc.position() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_set_beats_wraps() {
        let mut osc = oscillator(4, 60.0);
        osc.step(3.5);
        osc.set_beats(3, false);
        assert!((osc.position() - 0.5).abs() < EPSILON);
    }

    #[test]
    fn test_set_beats_turnover() {
        let mut osc = oscillator(4, 60.0);
        osc.step(3.25);
        osc.set_beats(2, true);
        assert!((osc.position() - 1.25).abs() < EPSILON);
    }
}
