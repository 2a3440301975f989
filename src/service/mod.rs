//! Service layer
//!
//! Side-effect services the activity processor hands work to.

mod notification;

pub use notification::{NotificationEvent, Notifier};
