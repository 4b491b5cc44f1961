//! Notification handling for one device session
//!
//! Notifications can arrive before the device schema is resolved. They are
//! queued until [`NotificationHandler::on_remote_schema_up`] supplies a
//! transformer, then decoded, filtered and handed to the listener in
//! arrival order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, trace, warn};

use crate::codec::{DeviceNotification, NetconfMessage, NotificationTransformer};
use crate::schema::base::NETCONF_NOTIFICATIONS_NAMESPACE;

/// Receiver of decoded notifications
pub trait NotificationListener: Send + Sync {
    fn on_notification(&self, notification: DeviceNotification);
}

/// Predicate deciding whether a notification is delivered
pub type NotificationFilter = Arc<dyn Fn(&DeviceNotification) -> bool + Send + Sync>;

/// True for `ietf-netconf-notifications:netconf-capability-change`
pub fn is_capability_change(notification: &DeviceNotification) -> bool {
    notification.name().is_some_and(|name| {
        name.namespace() == NETCONF_NOTIFICATIONS_NAMESPACE && name.local_name() == "netconf-capability-change"
    })
}

#[derive(Default)]
struct HandlerState {
    transformer: Option<Arc<dyn NotificationTransformer>>,
    queue: VecDeque<NetconfMessage>,
    filter: Option<NotificationFilter>,
}

/// Per-session notification dispatcher
pub struct NotificationHandler {
    device: String,
    listener: Arc<dyn NotificationListener>,
    state: Mutex<HandlerState>,
}

impl NotificationHandler {
    pub fn new(device: impl Into<String>, listener: Arc<dyn NotificationListener>) -> Self {
        Self {
            device: device.into(),
            listener,
            state: Mutex::new(HandlerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, HandlerState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("{}: notification state lock poisoned, recovering", self.device);
            poisoned.into_inner()
        })
    }

    /// Accept one raw notification from the transport
    pub fn handle_notification(&self, message: NetconfMessage) {
        let mut state = self.state();
        let Some(transformer) = state.transformer.clone() else {
            trace!("{}: schema not ready, queueing notification", self.device);
            state.queue.push_back(message);
            return;
        };
        let filter = state.filter.clone();
        drop(state);
        self.deliver(transformer.as_ref(), filter.as_ref(), &message);
    }

    /// Schema is resolved: start decoding and flush queued notifications
    pub fn on_remote_schema_up(&self, transformer: Arc<dyn NotificationTransformer>) {
        let mut state = self.state();
        state.transformer = Some(transformer.clone());
        let queued: Vec<NetconfMessage> = state.queue.drain(..).collect();
        let filter = state.filter.clone();
        drop(state);

        info!(
            "{}: schema up, delivering {} queued notifications",
            self.device,
            queued.len()
        );
        for message in &queued {
            self.deliver(transformer.as_ref(), filter.as_ref(), message);
        }
    }

    /// Session or schema went away: drop queued notifications and the filter
    pub fn on_remote_schema_down(&self) {
        let mut state = self.state();
        let dropped = state.queue.len();
        *state = HandlerState::default();
        info!("{}: schema down, dropped {} queued notifications", self.device, dropped);
    }

    /// Install the delivery filter, replacing any previous one
    pub fn set_filter(&self, filter: NotificationFilter) {
        self.state().filter = Some(filter);
    }

    pub fn clear_filter(&self) {
        self.state().filter = None;
    }

    pub fn queued(&self) -> usize {
        self.state().queue.len()
    }

    fn deliver(
        &self,
        transformer: &dyn NotificationTransformer,
        filter: Option<&NotificationFilter>,
        message: &NetconfMessage,
    ) {
        let notification = match transformer.to_notification(message) {
            Ok(notification) => notification,
            Err(e) => {
                warn!("{}: dropping malformed notification: {}", self.device, e);
                return;
            }
        };
        if filter.is_some_and(|filter| !filter(&notification)) {
            debug!("{}: notification {:?} filtered out", self.device, notification.name());
            return;
        }
        self.listener.on_notification(notification);
    }
}
