//! Poison-tolerant locking for the in-process maps behind stores, registries,
//! sessions and live components.
//!
//! A panicking render or action poisons whatever it held. The maps stay
//! structurally valid, so the guard is taken back and the event is logged with
//! the session or component it concerned and counted.

use std::{
    fmt,
    sync::{LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use metrics::counter;
use tracing::warn;
use uuid::Uuid;

use crate::domain::component::ComponentId;

const METRIC_POISON_RECOVERED: &str = "tessera_lock_poison_recovered_total";

/// What the guarded data belongs to.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Subject<'a> {
    Unscoped,
    Component(&'a ComponentId),
    Session(Uuid),
    CacheKey(&'a str),
}

impl Subject<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Subject::Unscoped => "none",
            Subject::Component(_) => "component",
            Subject::Session(_) => "session",
            Subject::CacheKey(_) => "cache_key",
        }
    }
}

impl fmt::Display for Subject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Unscoped => f.write_str("-"),
            Subject::Component(id) => write!(f, "{id}"),
            Subject::Session(id) => write!(f, "{id}"),
            Subject::CacheKey(key) => f.write_str(key),
        }
    }
}

/// Call site of a lock acquisition.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LockSite<'a> {
    module: &'static str,
    op: &'static str,
    subject: Subject<'a>,
}

impl<'a> LockSite<'a> {
    pub(crate) const fn new(module: &'static str, op: &'static str) -> Self {
        Self {
            module,
            op,
            subject: Subject::Unscoped,
        }
    }

    pub(crate) fn component(self, id: &'a ComponentId) -> Self {
        Self {
            subject: Subject::Component(id),
            ..self
        }
    }

    pub(crate) fn session(self, id: Uuid) -> Self {
        Self {
            subject: Subject::Session(id),
            ..self
        }
    }

    pub(crate) fn key(self, key: &'a str) -> Self {
        Self {
            subject: Subject::CacheKey(key),
            ..self
        }
    }

    fn recover<G>(self, result: LockResult<G>, guard: &'static str) -> G {
        result.unwrap_or_else(|poisoned| {
            warn!(
                module = self.module,
                op = self.op,
                guard,
                subject_kind = self.subject.kind(),
                subject = %self.subject,
                "recovered poisoned lock"
            );
            counter!(METRIC_POISON_RECOVERED, "module" => self.module).increment(1);
            poisoned.into_inner()
        })
    }
}

pub(crate) trait LockExt<T: ?Sized> {
    fn lock_at(&self, site: LockSite<'_>) -> MutexGuard<'_, T>;
}

impl<T: ?Sized> LockExt<T> for Mutex<T> {
    fn lock_at(&self, site: LockSite<'_>) -> MutexGuard<'_, T> {
        site.recover(self.lock(), "mutex")
    }
}

pub(crate) trait RwLockExt<T: ?Sized> {
    fn read_at(&self, site: LockSite<'_>) -> RwLockReadGuard<'_, T>;
    fn write_at(&self, site: LockSite<'_>) -> RwLockWriteGuard<'_, T>;
}

impl<T: ?Sized> RwLockExt<T> for RwLock<T> {
    fn read_at(&self, site: LockSite<'_>) -> RwLockReadGuard<'_, T> {
        site.recover(self.read(), "rwlock.read")
    }

    fn write_at(&self, site: LockSite<'_>) -> RwLockWriteGuard<'_, T> {
        site.recover(self.write(), "rwlock.write")
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Arc;

    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::*;

    const SITE: LockSite<'static> = LockSite::new("cache::lock", "test");

    #[test]
    fn poisoned_mutex_is_recovered_and_counted() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let slots = Arc::new(Mutex::new(vec![1_u32]));

        metrics::with_local_recorder(&recorder, || {
            let _ = catch_unwind(AssertUnwindSafe(|| {
                let mut guard = slots.lock_at(SITE.session(Uuid::nil()));
                guard.push(2);
                panic!("poison the session slots");
            }));
            assert!(slots.is_poisoned());

            let id = ComponentId::from("counter");
            assert_eq!(*slots.lock_at(SITE.component(&id)), vec![1, 2]);
        });

        let recovered = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find(|(key, ..)| key.key().name() == METRIC_POISON_RECOVERED)
            .map(|(.., value)| value);
        assert_eq!(recovered, Some(DebugValue::Counter(1)));
    }

    #[test]
    fn poisoned_rwlock_serves_readers_and_writers() {
        let entries = RwLock::new(String::from("a"));
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = entries.write_at(SITE);
            panic!("poison the entries");
        }));

        entries.write_at(SITE.key("k")).push('b');
        assert_eq!(entries.read_at(SITE).as_str(), "ab");
    }

    #[test]
    fn subjects_render_their_ids() {
        let id = ComponentId::from("card-7");
        assert_eq!(Subject::Component(&id).to_string(), "card-7");
        assert_eq!(Subject::CacheKey("Badge:ab").to_string(), "Badge:ab");
        assert_eq!(Subject::Unscoped.kind(), "none");
    }
}
