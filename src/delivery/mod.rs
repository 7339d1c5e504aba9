//! Delivery to the chat channel
//!
//! - DeliveryClient trait and the delivery error causes
//! - Discord REST implementation

pub mod discord;
pub mod types;

pub use discord::{DiscordClient, DiscordSettings};
pub use types::{caption, ChannelId, DeliveryClient, DeliveryError};
