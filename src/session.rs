//! Session store: the single source of truth for authentication state.
//!
//! Holds the current bearer token, mirrors it to durable storage, and fans out
//! presence changes to subscribers (route guards, the shell prompt). All
//! access happens on one thread; shared ownership is `Rc<SessionStore>`.

use crate::storage::{KeyValueStore, TOKEN_KEY};
use crate::token;
use std::cell::{Cell, RefCell};
use std::io;
use std::rc::{Rc, Weak};
use tracing::{info, warn};

type Listener = Rc<dyn Fn(bool)>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

pub struct SessionStore {
    token: RefCell<Option<String>>,
    store: Box<dyn KeyValueStore>,
    listeners: Rc<RefCell<Listeners>>,
}

/// Handle returned by [`SessionStore::subscribe`]
pub struct Subscription {
    id: u64,
    listeners: Weak<RefCell<Listeners>>,
    active: Cell<bool>,
}

impl Subscription {
    /// Deregister the listener. Calling this twice is harmless.
    pub fn unsubscribe(&self) {
        if !self.active.replace(false) {
            return;
        }
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .borrow_mut()
                .entries
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl SessionStore {
    /// Open a session backed by `store`, restoring any persisted token
    pub fn open(store: Box<dyn KeyValueStore>) -> Self {
        let token = match store.get(TOKEN_KEY) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "could not read stored token; starting logged out");
                None
            }
        };

        Self {
            token: RefCell::new(token),
            store,
            listeners: Rc::new(RefCell::new(Listeners::default())),
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    /// Session flag: a token is present
    pub fn is_logged_in(&self) -> bool {
        self.token.borrow().is_some()
    }

    /// A token is present and not expired
    pub fn has_valid_token(&self) -> bool {
        self.token.borrow().as_deref().is_some_and(token::is_valid)
    }

    /// Replace the token. No-op when the value is unchanged.
    ///
    /// Persists first, then updates memory and notifies subscribers with the
    /// new presence state. A persistence failure still updates memory and
    /// notifies; the I/O error is returned afterwards.
    pub fn set_token(&self, token: Option<String>) -> io::Result<()> {
        if *self.token.borrow() == token {
            return Ok(());
        }

        let persisted = match &token {
            Some(value) => self.store.set(TOKEN_KEY, value),
            None => self.store.remove(TOKEN_KEY),
        };
        if let Err(e) = &persisted {
            warn!(error = %e, "failed to persist token change");
        }

        let present = token.is_some();
        *self.token.borrow_mut() = token;
        info!(logged_in = present, "authentication state changed");
        self.notify(present);

        persisted
    }

    pub fn clear_token(&self) -> io::Result<()> {
        self.set_token(None)
    }

    /// Register a listener called with the presence flag on every token change
    pub fn subscribe(&self, listener: impl Fn(bool) + 'static) -> Subscription {
        let mut listeners = self.listeners.borrow_mut();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Rc::new(listener)));

        Subscription {
            id,
            listeners: Rc::downgrade(&self.listeners),
            active: Cell::new(true),
        }
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.listeners.borrow().entries.len()
    }

    fn notify(&self, present: bool) {
        // Snapshot so listeners can read the store or (un)subscribe re-entrantly
        let snapshot: Vec<Listener> = self
            .listeners
            .borrow()
            .entries
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for listener in snapshot {
            listener(present);
        }
    }
}
