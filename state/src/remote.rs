//! Remote data store
//!
//! [`RemoteStore`] is how asynchronous, fallible data reaches observers. It
//! holds exactly one [`RemoteData`] variant; every fetch replaces it wholesale.

use std::fmt;
use tracing::trace;

use crate::observable::{Observable, Readable, Subscription};

/// State of a remotely fetched value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteData<T, E> {
    /// No fetch attempted yet
    NotAsked,
    /// Fetch in flight; any previous value has been discarded
    Loading,
    /// Full snapshot from the last successful fetch
    Success(T),
    /// Cause of the last failed fetch
    Error(E),
}

impl<T, E> RemoteData<T, E> {
    pub fn is_not_asked(&self) -> bool {
        matches!(self, RemoteData::NotAsked)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, RemoteData::Loading)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RemoteData::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RemoteData::Error(_))
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            RemoteData::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            RemoteData::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            RemoteData::NotAsked => "not_asked",
            RemoteData::Loading => "loading",
            RemoteData::Success(_) => "success",
            RemoteData::Error(_) => "error",
        }
    }
}

/// Read-only view handed to observers of a [`RemoteStore`]
pub type RemoteReader<T, E> = Readable<RemoteData<T, E>>;

/// Reactive container for one remotely fetched value
///
/// Only the owner can drive transitions; hand out [`RemoteStore::reader`] to
/// everyone else. Retrying is the owner's business: call
/// [`RemoteStore::set_loading`] again.
pub struct RemoteStore<T, E> {
    inner: Observable<RemoteData<T, E>>,
}

impl<T, E> RemoteStore<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// New store in [`RemoteData::NotAsked`]
    pub fn new() -> Self {
        Self {
            inner: Observable::new(RemoteData::NotAsked),
        }
    }

    pub fn set_loading(&self) {
        trace!("Remote store -> loading");
        self.inner.set(RemoteData::Loading);
    }

    pub fn set_success(&self, value: T) {
        trace!("Remote store -> success");
        self.inner.set(RemoteData::Success(value));
    }

    pub fn set_error(&self, err: E) {
        trace!("Remote store -> error");
        self.inner.set(RemoteData::Error(err));
    }

    pub fn get(&self) -> RemoteData<T, E> {
        self.inner.get()
    }

    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&RemoteData<T, E>) + Send + Sync + 'static,
    {
        self.inner.subscribe(observer)
    }

    pub fn reader(&self) -> RemoteReader<T, E> {
        self.inner.reader()
    }
}

impl<T, E> Default for RemoteStore<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for RemoteStore<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStore").field("inner", &self.inner).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Store = RemoteStore<u32, String>;

    #[test]
    fn test_starts_not_asked() {
        let store = Store::new();
        assert!(store.get().is_not_asked());
        assert_eq!(store.get().status(), "not_asked");
    }

    #[test]
    fn test_loading_discards_previous_value() {
        let store = Store::new();
        store.set_success(3);
        store.set_loading();
        assert_eq!(store.get(), RemoteData::Loading);
        assert_eq!(store.get().success(), None);
    }

    #[test]
    fn test_loading_reachable_from_error() {
        let store = Store::new();
        store.set_error("boom".into());
        store.set_loading();
        assert!(store.get().is_loading());
    }

    #[test]
    fn test_reader_observes_every_transition() {
        let store = Store::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = store
            .reader()
            .subscribe(move |state: &RemoteData<u32, String>| sink.lock().push(state.clone()));

        store.set_loading();
        store.set_error("read failed".into());
        store.set_loading();
        store.set_success(9);

        assert_eq!(
            *seen.lock(),
            vec![
                RemoteData::NotAsked,
                RemoteData::Loading,
                RemoteData::Error("read failed".to_string()),
                RemoteData::Loading,
                RemoteData::Success(9),
            ]
        );
    }
}
