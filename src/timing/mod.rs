pub mod clock;
pub mod phase;
pub mod tracker;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::phase::{Durations, Phase};
pub use self::tracker::PhaseTracker;
