use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::AccessCredential;

/// Receives every credential change made through [`CredentialStore::set`].
///
/// Called in `set` order. Implementations must not call back into `set`.
pub trait CredentialObserver: Send + Sync {
    fn credential_changed(&self, credential: Option<&AccessCredential>);
}

/// Volatile, process-local holder of the current access credential.
///
/// Nothing here touches disk. A fresh store always starts empty.
#[derive(Default)]
pub struct CredentialStore {
    current: RwLock<Option<AccessCredential>>,
    observer: Mutex<Option<Weak<dyn CredentialObserver>>>,
    // Held across write + notify so the observer sees the last write last.
    order: Mutex<()>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the observer (the renewal scheduler) held weakly so the
    /// store does not keep it alive.
    pub fn observe(&self, observer: &Arc<dyn CredentialObserver>) {
        *self.observer.lock() = Some(Arc::downgrade(observer));
    }

    /// Replace the held credential and resynchronize the observer.
    pub fn set(&self, credential: Option<AccessCredential>) {
        let _order = self.order.lock();
        *self.current.write() = credential.clone();

        // Write lock released above; the observer may read the store.
        let observer = self.observer.lock().as_ref().and_then(Weak::upgrade);
        if let Some(observer) = observer {
            observer.credential_changed(credential.as_ref());
        }
    }

    pub fn clear(&self) {
        self.set(None);
    }

    pub fn get(&self) -> Option<AccessCredential> {
        self.current.read().clone()
    }

    pub fn exists(&self) -> bool {
        self.current.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        armed: AtomicUsize,
        disarmed: AtomicUsize,
    }

    impl CredentialObserver for Recorder {
        fn credential_changed(&self, credential: Option<&AccessCredential>) {
            match credential {
                Some(_) => self.armed.fetch_add(1, Ordering::SeqCst),
                None => self.disarmed.fetch_add(1, Ordering::SeqCst),
            };
        }
    }

    #[test]
    fn test_fresh_store_is_empty() {
        let store = CredentialStore::new();
        assert!(store.get().is_none());
        assert!(!store.exists());
    }

    #[test]
    fn test_set_and_clear_notify_observer() {
        let store = CredentialStore::new();
        let recorder = Arc::new(Recorder::default());
        let observer: Arc<dyn CredentialObserver> = recorder.clone();
        store.observe(&observer);

        store.set(Some(AccessCredential::new("a")));
        store.set(Some(AccessCredential::new("b")));
        assert_eq!(store.get().map(|c| c.token().to_string()).as_deref(), Some("b"));

        store.clear();
        assert!(!store.exists());
        assert_eq!(recorder.armed.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.disarmed.load(Ordering::SeqCst), 1);
    }

    /// Remembers the token of the last notification.
    #[derive(Default)]
    struct LastSeen(Mutex<Option<String>>);

    impl CredentialObserver for LastSeen {
        fn credential_changed(&self, credential: Option<&AccessCredential>) {
            *self.0.lock() = credential.map(|c| c.token().to_string());
        }
    }

    #[test]
    fn test_concurrent_sets_leave_observer_on_final_credential() {
        let store = Arc::new(CredentialStore::new());
        let last_seen = Arc::new(LastSeen::default());
        let observer: Arc<dyn CredentialObserver> = last_seen.clone();
        store.observe(&observer);

        let writers: Vec<_> = (0..8)
            .map(|writer| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        store.set(Some(AccessCredential::new(format!("t{}-{}", writer, i))));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("writer thread");
        }

        let current = store.get().map(|c| c.token().to_string());
        assert!(current.is_some());
        assert_eq!(*last_seen.0.lock(), current);
    }

    #[test]
    fn test_dropped_observer_is_ignored() {
        let store = CredentialStore::new();
        {
            let observer: Arc<dyn CredentialObserver> = Arc::new(Recorder::default());
            store.observe(&observer);
        }
        store.set(Some(AccessCredential::new("a")));
        assert!(store.exists());
    }
}
