use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use super::error::PolicyError;
use super::policy::{Filter, Policy};

/// Called after a dynamic policy's definition is replaced.
pub type Observer = Arc<dyn Fn() + Send + Sync>;

struct DynamicState {
    policy: RwLock<Arc<Policy>>,
    observer: Mutex<Option<Observer>>,
    filter: bool,
}

/// A policy whose definition can be swapped at runtime.
///
/// Handles are cheap to clone and share one definition; equality is by
/// identity. Whoever composes a dynamic policy into a larger tree may
/// [`attach`](Self::attach) an observer to learn when it must recompile.
/// The observer runs on the thread that called
/// [`set_policy`](Self::set_policy), after the swap, with no lock held.
/// It must not reassign the same dynamic policy.
#[derive(Clone)]
pub struct DynamicPolicy {
    state: Arc<DynamicState>,
}

impl DynamicPolicy {
    #[must_use]
    pub fn new(initial: impl Into<Policy>) -> Self {
        Self::with_kind(initial.into(), false)
    }

    /// A dynamic policy that only ever holds filters, so it may be used
    /// under the boolean operators.
    #[must_use]
    pub fn filter(initial: Filter) -> Self {
        Self::with_kind(initial.into(), true)
    }

    fn with_kind(policy: Policy, filter: bool) -> Self {
        Self {
            state: Arc::new(DynamicState {
                policy: RwLock::new(Arc::new(policy)),
                observer: Mutex::new(None),
                filter,
            }),
        }
    }

    #[must_use]
    pub fn is_filter(&self) -> bool {
        self.state.filter
    }

    /// A copy of the current definition.
    #[must_use]
    pub fn policy(&self) -> Policy {
        Policy::clone(&self.snapshot())
    }

    pub(crate) fn snapshot(&self) -> Arc<Policy> {
        Arc::clone(
            &self
                .state
                .policy
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Replace the definition and notify the observer, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::NotAFilter`] if this is a filter-typed dynamic
    /// policy and `policy` is not a filter. The definition is left unchanged.
    pub fn set_policy(&self, policy: impl Into<Policy>) -> Result<(), PolicyError> {
        let policy = policy.into();
        if self.state.filter && !policy.is_filter() {
            return Err(PolicyError::NotAFilter {
                policy: policy.to_string(),
            });
        }
        self.replace(policy);
        Ok(())
    }

    pub(crate) fn replace(&self, policy: Policy) {
        *self
            .state
            .policy
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(policy);
        let observer = self
            .state
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        debug!(notified = observer.is_some(), "dynamic policy reassigned");
        if let Some(observer) = observer {
            observer();
        }
    }

    /// Register the observer, replacing any previous one.
    pub fn attach(&self, observer: impl Fn() + Send + Sync + 'static) {
        *self
            .state
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(observer));
    }

    pub fn detach(&self) {
        *self
            .state
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.state
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Default for DynamicPolicy {
    fn default() -> Self {
        Self::new(Policy::Drop)
    }
}

impl PartialEq for DynamicPolicy {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for DynamicPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicPolicy")
            .field("policy", &self.snapshot())
            .field("filter", &self.state.filter)
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl fmt::Display for DynamicPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dynamic({})", self.snapshot())
    }
}

/// Only filter-typed dynamic policies convert.
impl TryFrom<DynamicPolicy> for Filter {
    type Error = PolicyError;

    fn try_from(d: DynamicPolicy) -> Result<Self, Self::Error> {
        if d.is_filter() {
            Ok(Filter::from_policy_unchecked(Policy::Dynamic(d)))
        } else {
            Err(PolicyError::NotAFilter {
                policy: d.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{field, fwd, Packet};

    #[test]
    fn default_drops() {
        let d = DynamicPolicy::default();
        assert_eq!(d.policy(), Policy::Drop);
        assert!(Policy::from(d).eval(&Packet::new()).is_empty());
    }

    #[test]
    fn detached_reassign_is_silent() {
        let d = DynamicPolicy::new(fwd(1));
        assert!(!d.is_attached());
        d.set_policy(fwd(2)).unwrap();
        assert_eq!(d.policy(), fwd(2));
    }

    #[test]
    fn attached_reassign_notifies() {
        let d = DynamicPolicy::new(fwd(1));
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        d.attach(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(d.is_attached());
        d.set_policy(fwd(2)).unwrap();
        d.set_policy(fwd(3)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        d.detach();
        d.set_policy(fwd(4)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn observer_sees_new_definition() {
        let d = DynamicPolicy::new(fwd(1));
        let seen = Arc::new(Mutex::new(None));
        let (handle, s) = (d.clone(), Arc::clone(&seen));
        d.attach(move || {
            *s.lock().unwrap() = Some(handle.policy());
        });
        d.set_policy(fwd(9)).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(fwd(9)));
    }

    #[test]
    fn filter_kind_rejects_non_filters() {
        let d = DynamicPolicy::filter(field("switch").eq(1_i64));
        let err = d.set_policy(fwd(1)).unwrap_err();
        assert!(matches!(err, PolicyError::NotAFilter { .. }));
        assert_eq!(d.policy(), field("switch").eq(1_i64).into_policy());
        assert!(d.set_policy(Policy::Identity).is_ok());
    }

    #[test]
    fn filter_kind_converts_to_filter() {
        let d = DynamicPolicy::filter(Filter::IDENTITY);
        let negated = !Filter::try_from(d).unwrap();
        assert!(negated.eval(&Packet::new()).is_empty());

        assert!(Filter::try_from(DynamicPolicy::new(fwd(1))).is_err());
    }

    #[test]
    fn clones_share_definition() {
        let a = DynamicPolicy::new(fwd(1));
        let b = a.clone();
        b.set_policy(fwd(5)).unwrap();
        assert_eq!(a.policy(), fwd(5));
        assert_eq!(a, b);
        assert_ne!(a, DynamicPolicy::new(fwd(5)));
    }
}
