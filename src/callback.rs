//! Callback & Operation Waiter support.
//!
//! A [`Callback`] is a polymorphic value storing a callable plus a place to
//! stash the arguments it will eventually be invoked with. [`CallbackProxy`]
//! is the type-erased view of one: it lets an async operation rewrite the
//! "result" arguments between the time the handler is registered and the
//! time the operation completes, without the caller needing to know the
//! handler's concrete closure type. Two proxies are `==` iff they reference
//! the same underlying callback instance, which lets completion contexts use
//! them as de-duplication keys (see `request::container`).

use std::fmt;
use std::sync::{Arc, Mutex};

type Slot<Args> = Arc<Mutex<Inner<Args>>>;

struct Inner<Args> {
    args: Args,
    f: Box<dyn FnMut(&Args) + Send>,
}

/// A callable bundled with its (mutable) bound arguments.
///
/// Cloning a `Callback` clones the handle, not the callable: both clones
/// invoke the same underlying closure and share the same argument slot.
pub struct Callback<Args> {
    inner: Slot<Args>,
}

impl<Args> Clone for Callback<Args> {
    fn clone(&self) -> Self {
        Callback { inner: self.inner.clone() }
    }
}

impl<Args: fmt::Debug> fmt::Debug for Callback<Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").field("args", &self.inner.lock().unwrap().args).finish()
    }
}

impl<Args> Callback<Args> {
    /// Builds a callback from a free function/closure and its initial bound
    /// arguments.
    pub fn new<F>(args: Args, f: F) -> Self
    where
        F: FnMut(&Args) + Send + 'static,
    {
        Callback {
            inner: Arc::new(Mutex::new(Inner { args, f: Box::new(f) })),
        }
    }

    /// Binds a callback to an owning object's method, the "member-function"
    /// shape. `owner` is held for the callback's lifetime.
    pub fn bound<T, F>(owner: Arc<Mutex<T>>, args: Args, mut method: F) -> Self
    where
        T: Send + 'static,
        F: FnMut(&mut T, &Args) + Send + 'static,
    {
        Callback::new(args, move |args| {
            let mut owner = owner.lock().unwrap();
            method(&mut owner, args);
        })
    }

    /// Invokes the callback with its currently bound arguments.
    pub fn invoke(&self) {
        let mut inner = self.inner.lock().unwrap();
        let Inner { args, f } = &mut *inner;
        f(&*args);
    }

    /// Returns a type-erased, compare-by-identity view of this callback.
    pub fn proxy(&self) -> CallbackProxy<Args> {
        CallbackProxy { inner: self.inner.clone() }
    }
}

/// Type-erased view of a [`Callback`]'s bound arguments.
///
/// `Args` plays the role of the bound argument tuple; any "result" value is
/// folded into whatever the closure does when invoked (this SDK's callbacks
/// are fire-and-forget; the "result" is delivered by mutating `Args` before
/// the next `invoke`).
pub struct CallbackProxy<Args> {
    inner: Slot<Args>,
}

impl<Args> Clone for CallbackProxy<Args> {
    fn clone(&self) -> Self {
        CallbackProxy { inner: self.inner.clone() }
    }
}

impl<Args> PartialEq for CallbackProxy<Args> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<Args> std::fmt::Debug for CallbackProxy<Args> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackProxy").field("inner", &Arc::as_ptr(&self.inner)).finish()
    }
}
impl<Args> Eq for CallbackProxy<Args> {}

impl<Args: Clone> CallbackProxy<Args> {
    /// Overwrites the bound arguments that the next `invoke()` will see.
    pub fn set_args(&self, args: Args) {
        self.inner.lock().unwrap().args = args;
    }

    pub fn get_args(&self) -> Args {
        self.inner.lock().unwrap().args.clone()
    }
}

impl<Args> CallbackProxy<Args> {
    pub fn invoke(&self) {
        let mut inner = self.inner.lock().unwrap();
        let Inner { args, f } = &mut *inner;
        f(&*args);
    }
}

/// Generates a builder function that prepends a fixed set of "forced"
/// result arguments (with defaults the caller may omit) to a user
/// callable's own arguments. This is how an async operation's result
/// variables end up forwarded into specific
/// caller-provided slots: the operation calls `proxy.set_args(..)` with the
/// real values right before completion, then `proxy.invoke()`.
///
/// ```
/// use vsm_core::define_callback_builder;
/// use vsm_core::callback::Callback;
///
/// define_callback_builder!(make_cb, (i32,), (10,), extra: (String, i32));
///
/// let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
/// let seen2 = seen.clone();
/// let cb = make_cb(move |forced, extra| {
///     *seen2.lock().unwrap() = Some((forced.0, extra.0.clone(), extra.1));
/// }, "x".to_string(), 20);
/// cb.invoke();
/// assert_eq!(*seen.lock().unwrap(), Some((10, "x".to_string(), 20)));
/// ```
#[macro_export]
macro_rules! define_callback_builder {
    ($name:ident, ($($forced_ty:ty),+ $(,)?), ($($default:expr),+ $(,)?), extra: ()) => {
        fn $name<F>(mut f: F) -> $crate::callback::Callback<(($($forced_ty,)+), ())>
        where
            F: FnMut(&($($forced_ty,)+), &()) + Send + 'static,
        {
            let forced: ($($forced_ty,)+) = ($($default,)+);
            $crate::callback::Callback::new((forced, ()), move |(forced, extra)| f(forced, extra))
        }
    };
    ($name:ident, ($($forced_ty:ty),+ $(,)?), ($($default:expr),+ $(,)?), extra: ($e0:ty $(,)?)) => {
        fn $name<F>(mut f: F, e0: $e0) -> $crate::callback::Callback<(($($forced_ty,)+), ($e0,))>
        where
            F: FnMut(&($($forced_ty,)+), &($e0,)) + Send + 'static,
        {
            let forced: ($($forced_ty,)+) = ($($default,)+);
            $crate::callback::Callback::new((forced, (e0,)), move |(forced, extra)| f(forced, extra))
        }
    };
    ($name:ident, ($($forced_ty:ty),+ $(,)?), ($($default:expr),+ $(,)?), extra: ($e0:ty, $e1:ty $(,)?)) => {
        fn $name<F>(mut f: F, e0: $e0, e1: $e1) -> $crate::callback::Callback<(($($forced_ty,)+), ($e0, $e1))>
        where
            F: FnMut(&($($forced_ty,)+), &($e0, $e1)) + Send + 'static,
        {
            let forced: ($($forced_ty,)+) = ($($default,)+);
            $crate::callback::Callback::new((forced, (e0, e1)), move |(forced, extra)| f(forced, extra))
        }
    };
    ($name:ident, ($($forced_ty:ty),+ $(,)?), ($($default:expr),+ $(,)?), extra: ($e0:ty, $e1:ty, $e2:ty $(,)?)) => {
        fn $name<F>(mut f: F, e0: $e0, e1: $e1, e2: $e2) -> $crate::callback::Callback<(($($forced_ty,)+), ($e0, $e1, $e2))>
        where
            F: FnMut(&($($forced_ty,)+), &($e0, $e1, $e2)) + Send + 'static,
        {
            let forced: ($($forced_ty,)+) = ($($default,)+);
            $crate::callback::Callback::new((forced, (e0, e1, e2)), move |(forced, extra)| f(forced, extra))
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_runs_the_closure_with_bound_args() {
        let seen = Arc::new(Mutex::new(0));
        let seen2 = seen.clone();
        let cb = Callback::new(5, move |n| *seen2.lock().unwrap() = *n);
        cb.invoke();
        assert_eq!(*seen.lock().unwrap(), 5);
    }

    #[test]
    fn proxies_to_the_same_callback_compare_equal() {
        let cb = Callback::new(0, |_| {});
        let a = cb.proxy();
        let b = cb.proxy();
        assert_eq!(a, b);

        let other = Callback::new(0, |_| {});
        assert_ne!(a, other.proxy());
    }

    #[test]
    fn set_args_rewrites_what_the_next_invoke_sees() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let cb = Callback::new(0, move |n| seen2.lock().unwrap().push(*n));
        let proxy = cb.proxy();
        proxy.set_args(1);
        proxy.invoke();
        proxy.set_args(2);
        proxy.invoke();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn forced_args_builder_prepends_defaults() {
        define_callback_builder!(make_cb, (i32,), (10,), extra: (String, i32));

        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        let cb = make_cb(
            move |forced, extra| {
                *seen2.lock().unwrap() = Some((forced.0, extra.0.clone(), extra.1));
            },
            "x".to_string(),
            20,
        );
        cb.invoke();
        assert_eq!(*seen.lock().unwrap(), Some((10, "x".to_string(), 20)));
    }
}
