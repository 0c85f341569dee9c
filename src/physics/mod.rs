// Physics - kinematics of the beat oscillator
// Root finding, force programs and the oscillator wrapping at the meter's beats

pub mod beat;
pub mod kinematics;
pub mod roots;

pub use beat::{BeatKinematics, ForceMode};
pub use kinematics::{Force, Motion, arrival, compute_accel_force, compute_sync_force};
pub use roots::{Roots, solve_cubic, solve_quadratic};
