//! Views, navigation and the route guard.
//!
//! The data layer never navigates. Callers that get `ApiError::Unauthenticated`
//! ask a [`Navigator`] for the login view, and [`RouteGuard::watch`] redirects
//! whenever the session flag drops while a protected view is showing.

use crate::session::{SessionStore, Subscription};
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Login,
    Register,
    Cars,
}

impl View {
    /// Views that require a logged-in session
    pub fn is_protected(&self) -> bool {
        matches!(self, View::Cars)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "register",
            Self::Cars => "cars",
        }
    }
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Navigator {
    fn navigate(&self, view: View);
    fn current(&self) -> View;
}

/// Navigator for the terminal: tracks the current view and tells the user
/// when they are sent back to the login prompt.
pub struct TerminalNavigator {
    current: Cell<View>,
}

impl TerminalNavigator {
    pub fn new(initial: View) -> Self {
        Self {
            current: Cell::new(initial),
        }
    }
}

impl Navigator for TerminalNavigator {
    fn navigate(&self, view: View) {
        let previous = self.current.replace(view);
        if view == View::Login && previous != View::Login {
            eprintln!("Session ended. Log in with /login <username> <password>");
        }
    }

    fn current(&self) -> View {
        self.current.get()
    }
}

pub struct RouteGuard;

impl RouteGuard {
    /// The view to actually show when `requested` is asked for.
    /// A stored token that is malformed or expired is evicted first.
    pub fn resolve(session: &SessionStore, requested: View) -> View {
        if !requested.is_protected() {
            return requested;
        }

        if session.is_logged_in() && !session.has_valid_token() {
            warn!("stored token expired; logging out");
            if let Err(e) = session.clear_token() {
                warn!(error = %e, "failed to remove stored token");
            }
        }

        if session.is_logged_in() {
            requested
        } else {
            debug!(view = %requested, "redirecting to login");
            View::Login
        }
    }

    /// Resolve `requested` and navigate there
    pub fn enter(session: &SessionStore, navigator: &dyn Navigator, requested: View) -> View {
        let view = Self::resolve(session, requested);
        navigator.navigate(view);
        view
    }

    /// Redirect to login whenever the session is lost on a protected view
    pub fn watch(session: &SessionStore, navigator: Rc<dyn Navigator>) -> Subscription {
        session.subscribe(move |logged_in| {
            if !logged_in && navigator.current().is_protected() {
                navigator.navigate(View::Login);
            }
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingNavigator;
    use super::*;
    use crate::storage::MemoryStore;
    use crate::token::testing::token_expiring_in;

    fn session() -> SessionStore {
        SessionStore::open(Box::new(MemoryStore::new()))
    }

    #[test]
    fn test_public_views_always_allowed() {
        let session = session();
        assert_eq!(RouteGuard::resolve(&session, View::Login), View::Login);
        assert_eq!(RouteGuard::resolve(&session, View::Register), View::Register);
    }

    #[test]
    fn test_protected_view_requires_login() {
        let session = session();
        assert_eq!(RouteGuard::resolve(&session, View::Cars), View::Login);

        session.set_token(Some(token_expiring_in(600))).unwrap();
        assert_eq!(RouteGuard::resolve(&session, View::Cars), View::Cars);
    }

    #[test]
    fn test_expired_token_evicted_on_protected_view() {
        let session = session();
        session.set_token(Some(token_expiring_in(-5))).unwrap();

        assert_eq!(RouteGuard::resolve(&session, View::Cars), View::Login);
        assert_eq!(session.token(), None);
    }

    #[test]
    fn test_enter_navigates() {
        let session = session();
        let nav = RecordingNavigator::new(View::Login);
        assert_eq!(RouteGuard::enter(&session, &nav, View::Cars), View::Login);
        assert_eq!(*nav.history.borrow(), vec![View::Login]);
    }

    #[test]
    fn test_watch_redirects_on_logout_from_protected_view() {
        let session = session();
        session.set_token(Some(token_expiring_in(600))).unwrap();
        let nav = Rc::new(RecordingNavigator::new(View::Cars));
        let _sub = RouteGuard::watch(&session, nav.clone());

        session.clear_token().unwrap();
        assert_eq!(nav.current(), View::Login);
        assert_eq!(*nav.history.borrow(), vec![View::Login]);
    }

    #[test]
    fn test_watch_ignores_public_views_and_logins() {
        let session = session();
        let nav = Rc::new(RecordingNavigator::new(View::Register));
        let _sub = RouteGuard::watch(&session, nav.clone());

        session.set_token(Some("t".to_string())).unwrap();
        session.clear_token().unwrap();
        assert!(nav.history.borrow().is_empty());
    }

    #[test]
    fn test_terminal_navigator_tracks_view() {
        let nav = TerminalNavigator::new(View::Login);
        nav.navigate(View::Cars);
        assert_eq!(nav.current(), View::Cars);
        nav.navigate(View::Login);
        assert_eq!(nav.current(), View::Login);
    }
}
