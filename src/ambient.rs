//! Ambient identity: "who is acting" and "in which request" for the
//! current unit of work.
//!
//! The pipeline only asks an [`IdentitySource`] when a trail event does not
//! already carry an actor or request. [`ThreadLocalIdentity`] is the stock
//! implementation: a web layer binds the request and actor at the start of
//! each request, background code can [`impersonate`](ThreadLocalIdentity::impersonate).

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::request::{Actor, RequestInfo};

/// Accessor for the identity and request active on the calling thread.
pub trait IdentitySource: Send + Sync {
    /// Returns the acting identity, if one is established.
    fn current_actor(&self) -> Option<Actor>;

    /// Returns the request being served, if any.
    fn current_request(&self) -> Option<Arc<RequestInfo>>;
}

#[derive(Default)]
struct Ambient {
    actor: Option<Actor>,
    request: Option<Arc<RequestInfo>>,
}

thread_local! {
    static AMBIENT: RefCell<Ambient> = RefCell::new(Ambient::default());
}

/// [`IdentitySource`] backed by per-thread state.
///
/// # Examples
///
/// ```
/// use trails_core::{Actor, IdentitySource, ObjectKey, ThreadLocalIdentity};
///
/// let admin = Actor::new(ObjectKey::new("auth.User", 1), "admin");
/// {
///     let _guard = ThreadLocalIdentity::impersonate(Some(admin.clone()));
///     assert_eq!(ThreadLocalIdentity.current_actor(), Some(admin));
/// }
/// assert_eq!(ThreadLocalIdentity.current_actor(), None);
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadLocalIdentity;

impl ThreadLocalIdentity {
    /// Sets the acting identity for the calling thread.
    pub fn set_current_actor(actor: Option<Actor>) {
        AMBIENT.with(|ambient| ambient.borrow_mut().actor = actor);
    }

    /// Sets the request for the calling thread.
    pub fn set_current_request(request: Option<Arc<RequestInfo>>) {
        AMBIENT.with(|ambient| ambient.borrow_mut().request = request);
    }

    /// Acts as `actor` until the returned guard is dropped, then restores
    /// whoever was acting before.
    pub fn impersonate(actor: Option<Actor>) -> ActorGuard {
        let previous = AMBIENT.with(|ambient| std::mem::replace(&mut ambient.borrow_mut().actor, actor));
        ActorGuard {
            previous,
            _not_send: PhantomData,
        }
    }

    /// Binds `request` until the returned guard is dropped.
    pub fn bind_request(request: Arc<RequestInfo>) -> RequestGuard {
        let previous =
            AMBIENT.with(|ambient| std::mem::replace(&mut ambient.borrow_mut().request, Some(request)));
        RequestGuard {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl IdentitySource for ThreadLocalIdentity {
    fn current_actor(&self) -> Option<Actor> {
        AMBIENT.with(|ambient| ambient.borrow().actor.clone())
    }

    fn current_request(&self) -> Option<Arc<RequestInfo>> {
        AMBIENT.with(|ambient| ambient.borrow().request.clone())
    }
}

/// Restores the previous actor when dropped.
#[must_use = "the impersonation ends when the guard is dropped"]
pub struct ActorGuard {
    previous: Option<Actor>,
    // Restoring must happen on the thread that impersonated.
    _not_send: PhantomData<*const ()>,
}

impl Drop for ActorGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        AMBIENT.with(|ambient| ambient.borrow_mut().actor = previous);
    }
}

/// Restores the previous request when dropped.
#[must_use = "the request is unbound when the guard is dropped"]
pub struct RequestGuard {
    previous: Option<Arc<RequestInfo>>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        AMBIENT.with(|ambient| ambient.borrow_mut().request = previous);
    }
}
