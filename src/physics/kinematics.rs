// Kinematics solver
//
// One-dimensional motion under a linearly varying acceleration
// a(t) = base + slope * t. Times are in seconds, positions in beats.

use super::roots::solve_cubic;

/// Linearly varying acceleration program
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Force {
    /// Acceleration at the start of the program (beats/s²)
    pub base: f64,
    /// Change of acceleration per second (beats/s³)
    pub slope: f64,
}

impl Force {
    pub fn new(base: f64, slope: f64) -> Self {
        Self { base, slope }
    }

    pub fn is_zero(&self) -> bool {
        self.base == 0.0 && self.slope == 0.0
    }

    /// Acceleration after `time` seconds
    pub fn acceleration(&self, time: f64) -> f64 {
        self.base + self.slope * time
    }

    /// The same program, started `time` seconds later
    pub fn shifted(&self, time: f64) -> Self {
        Self {
            base: self.acceleration(time),
            slope: self.slope,
        }
    }
}

/// Position/velocity pair of a moving point
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Motion {
    pub position: f64,
    pub velocity: f64,
}

/// Integrates `motion` under `force` for `time` seconds
pub fn integrate(motion: Motion, force: &Force, time: f64) -> Motion {
    let t2 = time * time;
    let t3 = t2 * time;
    Motion {
        position: motion.position
            + motion.velocity * time
            + force.base * t2 / 2.0
            + force.slope * t3 / 6.0,
        velocity: motion.velocity + force.base * time + force.slope * t2 / 2.0,
    }
}

/// Constant acceleration that changes the velocity by `delta_velocity`
///
/// Returns the force and the time it has to be applied. A zero velocity
/// change or a non-positive acceleration magnitude yields no force.
pub fn compute_accel_force(delta_velocity: f64, accel: f64) -> (Force, f64) {
    if delta_velocity == 0.0 || accel <= 0.0 {
        return (Force::default(), 0.0);
    }
    let time = delta_velocity.abs() / accel;
    (Force::new(delta_velocity.signum() * accel, 0.0), time)
}

/// Linear acceleration program that, after exactly `time` seconds, has moved
/// the point `delta_position` beyond free motion and changed its velocity by
/// `delta_velocity`
///
/// With `time == 0` no force can do the job; the caller has to apply the
/// deviation instantly.
pub fn compute_sync_force(delta_position: f64, delta_velocity: f64, time: f64) -> Force {
    if time <= 0.0 {
        return Force::default();
    }
    let t2 = time * time;
    let t3 = t2 * time;

    // v: base*T + slope*T²/2 = dv
    // p: base*T²/2 + slope*T³/6 = dp
    let slope = 6.0 * (delta_velocity * time - 2.0 * delta_position) / t3;
    let base = (6.0 * delta_position - 2.0 * delta_velocity * time) / t2;

    Force::new(base, slope)
}

/// Time until `target` is reached, starting at `motion` under `force`
///
/// Looks for the smallest non-negative root of the motion cubic that is not
/// greater than `max_time`. Without such a root the force is assumed to be
/// applied for the full `max_time`, which is returned.
pub fn arrival(motion: Motion, target: f64, force: &Force, max_time: f64) -> f64 {
    if motion.position == target {
        return 0.0;
    }

    let roots = solve_cubic(
        force.slope / 6.0,
        force.base / 2.0,
        motion.velocity,
        motion.position - target,
    );

    roots.smallest_in(0.0, max_time).unwrap_or(max_time)
}
