use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use relbot_core::{CommandHandler, Notifier};

/// How many recently dispatched messages are remembered.
const RECENT_EVENTS: usize = 256;

/// Bounded memory of `(channel, ts)` pairs already dispatched.
///
/// Slack delivers one user message twice when the bot is both mentioned and
/// subscribed to the channel (`message` and `app_mention`).
#[derive(Debug, Default)]
pub struct RecentEvents {
    inner: Mutex<(VecDeque<(String, String)>, HashSet<(String, String)>)>,
}

impl RecentEvents {
    /// `true` the first time a message is seen, `false` for repeats.
    pub fn first_sighting(&self, channel: &str, ts: &str) -> bool {
        let key = (channel.to_string(), ts.to_string());
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (order, seen) = &mut *guard;
        if !seen.insert(key.clone()) {
            return false;
        }
        order.push_back(key);
        if order.len() > RECENT_EVENTS {
            if let Some(old) = order.pop_front() {
                seen.remove(&old);
            }
        }
        true
    }
}

/// Shared application state passed to all route handlers.
pub struct AppState<R, G, S, C> {
    pub handler: Arc<CommandHandler<R, G, S>>,
    /// Posts command replies; the channel comes from each event.
    pub notifier: Arc<Notifier<C>>,
    pub signing_secret: Arc<str>,
    pub recent: Arc<RecentEvents>,
}

impl<R, G, S, C> AppState<R, G, S, C> {
    pub fn new(
        handler: Arc<CommandHandler<R, G, S>>,
        notifier: Arc<Notifier<C>>,
        signing_secret: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            handler,
            notifier,
            signing_secret: signing_secret.into(),
            recent: Arc::default(),
        }
    }
}

// Manual impl: the type parameters themselves need not be `Clone`.
impl<R, G, S, C> Clone for AppState<R, G, S, C> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            notifier: Arc::clone(&self.notifier),
            signing_secret: Arc::clone(&self.signing_secret),
            recent: Arc::clone(&self.recent),
        }
    }
}
