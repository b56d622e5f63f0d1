//! `mindlink-middleware` – The Observer Bus
//!
//! Carries what the bridge is doing to anyone who wants to watch, without
//! the bridge waiting on them.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
