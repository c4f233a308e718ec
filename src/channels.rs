//! Named pub/sub channels that live independently of scene loads.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, error};
use serde_json::Value;

use crate::error::ScriptError;

pub type ChannelCallback = dyn Fn(&[Value]) -> Result<(), ScriptError>;

/// Identifies one subscription so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Unsubscribe after the first delivery.
    pub once: bool,
}

impl ListenerOptions {
    pub fn once() -> Self {
        Self { once: true }
    }
}

#[derive(Clone)]
struct Subscriber {
    id: ListenerId,
    once: bool,
    callback: Rc<ChannelCallback>,
}

/// Subscribers per channel name. Interior mutability lets callbacks subscribe,
/// unsubscribe and invoke while a delivery is in progress.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RefCell<HashMap<String, Vec<Subscriber>>>,
    next_id: Cell<u64>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, name: &str, callback: F, options: ListenerOptions) -> ListenerId
    where
        F: Fn(&[Value]) -> Result<(), ScriptError> + 'static,
    {
        let id = ListenerId(self.next_id.get() + 1);
        self.next_id.set(id.0);
        self.channels
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .push(Subscriber {
                id,
                once: options.once,
                callback: Rc::new(callback),
            });
        id
    }

    pub fn remove(&self, name: &str, id: ListenerId) -> bool {
        let mut channels = self.channels.borrow_mut();
        let Some(list) = channels.get_mut(name) else {
            return false;
        };
        let Some(index) = list.iter().position(|subscriber| subscriber.id == id) else {
            return false;
        };
        list.remove(index);
        if list.is_empty() {
            channels.remove(name);
        }
        true
    }

    /// Delivers `args` to every subscriber of `name` in subscription order and
    /// returns how many were called. Failures are logged and never reach the
    /// caller.
    pub fn invoke(&self, name: &str, args: &[Value]) -> usize {
        let snapshot = match self.channels.borrow().get(name) {
            Some(list) => list.clone(),
            None => {
                debug!("no listeners for channel {name}");
                return 0;
            }
        };

        let mut called = 0;
        for subscriber in snapshot {
            // once-subscribers leave before running so a failing or re-entrant
            // delivery cannot reach them twice
            if subscriber.once && !self.remove(name, subscriber.id) {
                continue;
            }
            called += 1;
            if let Err(err) = (subscriber.callback)(args) {
                error!("listener on channel {name} failed: {err}");
            }
        }
        called
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.channels.borrow().get(name).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.channels.borrow_mut().clear();
    }
}
