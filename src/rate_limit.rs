use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Direct (unkeyed) limiter shared by a component's callers.
pub type DirectLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Limiter allowing `per_second` operations each second, with burst up to
/// the same amount. Used to pace subscription batches and REST polls.
pub fn per_second(per_second: u32) -> DirectLimiter {
    let quota = Quota::per_second(
        NonZeroU32::new(per_second.max(1)).expect("non-zero after max(1)"),
    );
    Arc::new(RateLimiter::direct(quota))
}

/// Limiter allowing `per_minute` operations each minute.
pub fn per_minute(per_minute: u32) -> DirectLimiter {
    let quota = Quota::per_minute(
        NonZeroU32::new(per_minute.max(1)).expect("non-zero after max(1)"),
    );
    Arc::new(RateLimiter::direct(quota))
}
