//! Rate limiting logic and state management.

mod counter;
mod key;
mod limiter;
mod presets;

pub use counter::{RateLimitDecision, SlidingWindowCounter};
pub use key::{KeyStrategy, RequestInfo, FALLBACK_KEY};
pub use limiter::{PolicyConfig, RateLimiter, SweeperHandle};
pub use presets::{PresetRule, Presets};
