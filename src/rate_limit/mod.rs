pub mod clock;
pub mod key_schema;
pub mod limiter;
pub mod sliding_window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key_schema::KeySchema;
pub use limiter::RateLimiter;
pub use sliding_window::{LimiterConfig, RateLimitResult, SlidingWindowRateLimiter};
