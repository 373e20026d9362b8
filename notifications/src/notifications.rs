//! Braid notification fan-out
//! Delivers DAG events to listeners by subscription and watch-set

pub mod notification_manager;
pub mod route;

pub use notification_manager::{EventKind, ListenerId, NotificationError, NotificationManager};
pub use route::{ChannelRoute, Notification, NotificationRoute};
