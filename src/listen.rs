//! Typed `LISTEN`/`NOTIFY` subscriptions on top of [`crate::state::action::AsyncMessage`].
//!
//! The wire protocol delivers notifications as out-of-band `NotificationResponse`
//! messages, surfaced by the state machines as `AsyncMessage::Notification` and
//! routed to whatever [`crate::handler::AsyncMessageHandler`] is installed on the
//! connection. `Listener` is that handler: it keeps a per-channel callback map
//! so callers don't have to match on `channel` themselves.

use std::collections::HashMap;

use crate::handler::AsyncMessageHandler;
use crate::state::action::AsyncMessage;

/// A single delivered notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub pid: u32,
    pub channel: String,
    pub payload: String,
}

/// Dispatches `NOTIFY` deliveries to per-channel callbacks.
///
/// Install with `Conn::set_async_message_handler(listener)`. Notices and
/// parameter-change messages are ignored; only `Notification` is dispatched.
/// Register channels with `LISTEN <channel>` via a normal query — this type
/// only handles delivery, not the `LISTEN`/`UNLISTEN` SQL itself.
#[derive(Default)]
pub struct Listener {
    callbacks: HashMap<String, Box<dyn FnMut(Notification) + Send>>,
    catch_all: Option<Box<dyn FnMut(Notification) + Send>>,
}

impl Listener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for notifications on `channel`.
    pub fn on(&mut self, channel: impl Into<String>, callback: impl FnMut(Notification) + Send + 'static) {
        self.callbacks.insert(channel.into(), Box::new(callback));
    }

    /// Register a callback invoked for channels with no specific registration.
    pub fn on_any(&mut self, callback: impl FnMut(Notification) + Send + 'static) {
        self.catch_all = Some(Box::new(callback));
    }
}

impl AsyncMessageHandler for Listener {
    fn handle(&mut self, message: &AsyncMessage) {
        let AsyncMessage::Notification {
            pid,
            channel,
            payload,
        } = message
        else {
            return;
        };
        let notification = Notification {
            pid: *pid,
            channel: channel.clone(),
            payload: payload.clone(),
        };
        if let Some(cb) = self.callbacks.get_mut(channel) {
            cb(notification);
        } else if let Some(cb) = &mut self.catch_all {
            cb(notification);
        }
    }
}
