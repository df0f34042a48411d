//! Subscriptions and the subscribers behind them.
//!
//! A [`Subscription`] is the persisted tracking row of one subscriber: its
//! lifecycle status, the last sequence number it applied and, while in
//! error, what went wrong. A [`Subscriber`] is the live side: a
//! [`Projection`] plus an optional [`CatchUpHook`], registered under the
//! same id.
//!
//! # Example
//!
//! ```ignore
//! let subscribers = Subscribers::new(vec![
//!     Subscriber::new("contentGraph", Arc::new(ContentGraphProjection::new(table)))
//!         .with_catch_up_hook(Arc::new(CacheFlushingHook::default())),
//! ])?;
//! ```

mod subscriber;
mod types;

pub use subscriber::{
    CatchUpHook, Projection, ProjectionError, ProjectionStatus, Subscriber, Subscribers,
};
pub use types::{
    DetachedSubscriptionStatus, ProjectionSubscriptionStatus, Subscription, SubscriptionError,
    SubscriptionStatus, SubscriptionStatusCollection, SubscriptionStatusEntry,
    SubscriptionStatusFilter, Subscriptions,
};
