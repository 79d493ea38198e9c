//! Proactive renewal ahead of credential expiry.
//!
//! One timer per credential. Setting a new credential replaces the timer,
//! clearing it disarms. The timer only ever asks [`Renew`] for a renewal, so
//! it joins a renewal that a request already started instead of racing it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::renewal::Renew;
use super::store::CredentialObserver;
use super::timer::ScheduledTask;
use super::{AccessCredential, CredentialStore};

/// Whether the hosting environment is currently in front of the user.
/// Timers are unreliable while backgrounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Foreground,
    Background,
}

pub struct RenewalScheduler {
    store: Arc<CredentialStore>,
    renewer: Arc<dyn Renew>,
    safety_margin: Duration,
    timer: Mutex<Option<ScheduledTask>>,
    visibility: Mutex<Visibility>,
}

impl RenewalScheduler {
    pub fn new(
        store: Arc<CredentialStore>,
        renewer: Arc<dyn Renew>,
        safety_margin: Duration,
    ) -> Self {
        Self {
            store,
            renewer,
            safety_margin,
            timer: Mutex::new(None),
            visibility: Mutex::new(Visibility::Foreground),
        }
    }

    /// Schedule renewal `safety_margin` before the credential expires, or
    /// renew right away if that point has passed or the expiry is unknown.
    pub fn arm(&self, credential: &AccessCredential) {
        match self.delay_for(credential) {
            Some(delay) => {
                debug!(delay_secs = delay.as_secs(), "Arming renewal timer");
                let renewer = self.renewer.clone();
                let task = ScheduledTask::after(delay, fire(renewer));
                // Dropping the previous handle cancels it.
                let previous = self.timer.lock().replace(task);
                drop(previous);
            }
            None => {
                debug!("Credential inside safety margin, renewing now");
                self.disarm();
                self.renew_now();
            }
        }
    }

    /// Cancel the timer. A renewal already in flight keeps running.
    pub fn disarm(&self) {
        if let Some(task) = self.timer.lock().take() {
            debug!("Disarming renewal timer");
            task.cancel();
        }
    }

    /// Report a visibility transition. Coming back to the foreground
    /// re-evaluates the current credential against the clock.
    pub fn visibility_changed(&self, visibility: Visibility) {
        let previous = std::mem::replace(&mut *self.visibility.lock(), visibility);
        if previous == Visibility::Background && visibility == Visibility::Foreground {
            if let Some(credential) = self.store.get() {
                debug!("Foregrounded, re-evaluating credential expiry");
                self.arm(&credential);
            }
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer.lock().as_ref().map(ScheduledTask::is_pending).unwrap_or(false)
    }

    /// When the armed timer will fire, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.timer
            .lock()
            .as_ref()
            .filter(|task| task.is_pending())
            .map(ScheduledTask::deadline)
    }

    fn delay_for(&self, credential: &AccessCredential) -> Option<Duration> {
        let left = credential.time_until_expiry()?.to_std().ok()?;
        left.checked_sub(self.safety_margin).filter(|d| !d.is_zero())
    }

    fn renew_now(&self) {
        // Registered synchronously; the spawned task only observes the outcome.
        let pending = self.renewer.renew();
        tokio::spawn(async move {
            if let Err(e) = pending.await {
                warn!(error = %e, "Immediate renewal failed");
            }
        });
    }
}

impl CredentialObserver for RenewalScheduler {
    fn credential_changed(&self, credential: Option<&AccessCredential>) {
        match credential {
            Some(credential) => self.arm(credential),
            None => self.disarm(),
        }
    }
}

async fn fire(renewer: Arc<dyn Renew>) {
    debug!("Renewal timer fired");
    // On success the store re-arms us with the new credential. On failure
    // we stop; the next request renews reactively.
    if let Err(e) = renewer.renew().await {
        warn!(error = %e, "Scheduled renewal failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credential::tests::token_expiring_in;
    use crate::auth::renewal::{PendingRenewal, RenewalError};
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MARGIN: Duration = Duration::from_secs(60);

    /// Renews without the network: hands out a credential with a fixed TTL.
    struct FakeRenewer {
        store: Arc<CredentialStore>,
        calls: AtomicUsize,
        next_ttl: i64,
        fail: bool,
    }

    impl Renew for FakeRenewer {
        fn renew(&self) -> PendingRenewal {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let store = self.store.clone();
            let ttl = self.next_ttl;
            let fail = self.fail;
            async move {
                if fail {
                    store.clear();
                    return Err(RenewalError::Rejected(401));
                }
                let credential = AccessCredential::new(token_expiring_in(ttl));
                store.set(Some(credential.clone()));
                Ok(credential)
            }
            .boxed()
            .shared()
        }
    }

    type Fixture = (Arc<CredentialStore>, Arc<FakeRenewer>, Arc<RenewalScheduler>);

    fn setup(next_ttl: i64, fail: bool) -> Fixture {
        let store = Arc::new(CredentialStore::new());
        let renewer = Arc::new(FakeRenewer {
            store: store.clone(),
            calls: AtomicUsize::new(0),
            next_ttl,
            fail,
        });
        let scheduler = Arc::new(RenewalScheduler::new(store.clone(), renewer.clone(), MARGIN));
        let observer: Arc<dyn CredentialObserver> = scheduler.clone();
        store.observe(&observer);
        (store, renewer, scheduler)
    }

    fn remaining(scheduler: &RenewalScheduler) -> Duration {
        scheduler
            .deadline()
            .expect("timer should be armed")
            .saturating_duration_since(Instant::now())
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_chain_rearms_for_new_credential() {
        let (store, renewer, scheduler) = setup(300, false);

        store.set(Some(AccessCredential::new(token_expiring_in(70))));
        let first = remaining(&scheduler);
        assert!(first > Duration::from_secs(8) && first <= Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(renewer.calls.load(Ordering::SeqCst), 1);

        let second = remaining(&scheduler);
        assert!(second > Duration::from_secs(235) && second <= Duration::from_secs(240));
    }

    #[tokio::test(start_paused = true)]
    async fn test_near_expiry_renews_immediately() {
        let (store, renewer, scheduler) = setup(300, false);

        store.set(Some(AccessCredential::new(token_expiring_in(30))));
        assert_eq!(renewer.calls.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_armed());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_expiry_renews_immediately() {
        let (store, renewer, _scheduler) = setup(300, false);
        store.set(Some(AccessCredential::new("opaque")));
        assert_eq!(renewer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_credential_cancels_previous_timer() {
        let (store, renewer, scheduler) = setup(3600, false);

        store.set(Some(AccessCredential::new(token_expiring_in(600))));
        store.set(Some(AccessCredential::new(token_expiring_in(1200))));
        assert!(remaining(&scheduler) > Duration::from_secs(1100));

        // Past the first credential's deadline
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(renewer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_disarms() {
        let (store, renewer, scheduler) = setup(300, false);

        store.set(Some(AccessCredential::new(token_expiring_in(120))));
        assert!(scheduler.is_armed());
        store.clear();
        assert!(!scheduler.is_armed());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(renewer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_scheduled_renewal_stops_chain() {
        let (store, renewer, scheduler) = setup(300, true);

        store.set(Some(AccessCredential::new(token_expiring_in(65))));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(renewer.calls.load(Ordering::SeqCst), 1);
        assert!(!store.exists());
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_regain_reevaluates() {
        // Not wired as observer: the store changes silently, as if time
        // passed while the timer was frozen in the background.
        let store = Arc::new(CredentialStore::new());
        let renewer = Arc::new(FakeRenewer {
            store: store.clone(),
            calls: AtomicUsize::new(0),
            next_ttl: 300,
            fail: false,
        });
        let scheduler = RenewalScheduler::new(store.clone(), renewer.clone(), MARGIN);

        store.set(Some(AccessCredential::new(token_expiring_in(30))));
        scheduler.visibility_changed(Visibility::Foreground);
        assert_eq!(renewer.calls.load(Ordering::SeqCst), 0);

        scheduler.visibility_changed(Visibility::Background);
        scheduler.visibility_changed(Visibility::Foreground);
        assert_eq!(renewer.calls.load(Ordering::SeqCst), 1);

        store.set(Some(AccessCredential::new(token_expiring_in(600))));
        scheduler.visibility_changed(Visibility::Background);
        scheduler.visibility_changed(Visibility::Foreground);
        assert_eq!(renewer.calls.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_armed());
    }
}
