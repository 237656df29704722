//! Sliding-window attempt limiting with lockout.

mod clock;
mod entry;
mod limiter;
mod policy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{Evaluation, Limiter};
pub use policy::Policy;
