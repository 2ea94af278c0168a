use crate::message::{SendKind, SsdpMessage};
use crate::node::Node;
use crate::scheduler;
use std::net::IpAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tracing::warn;

slotmap::new_key_type! { pub(crate) struct ScannerKey; }

/// A scanner that is idle (no search outstanding)
pub(crate) const IDLE: i32 = -1;

pub(crate) struct ScanState {
    pub(crate) matcher: SsdpMessage,
    pub(crate) callback: Box<dyn ScanCallback>,
    pub(crate) current_search_id: AtomicI32,
}

/// Run a user callback, containing any panic
///
/// The receive tasks must not die because a callback failed.
pub(crate) fn guarded<F: FnOnce()>(f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!("scan callback panicked (ignored)");
    }
}

/// Receives the messages matched by a [`Scanner`]
///
/// All methods default to doing nothing; implement the ones you care
/// about. Callbacks are invoked on the node's receive tasks and must not
/// block for long; hand longer work to [`Node::schedule`] or a task of
/// your own. A callback that wants to search again can clone the scanner
/// and spawn.
pub trait ScanCallback: Send + Sync {
    /// A message satisfying the scanner's matcher arrived
    ///
    /// `reply` distinguishes unicast search responses from multicast
    /// notifications. `search_id` is the scanner's currently outstanding
    /// search, or −1 if none is pending.
    fn on_message_received(
        &self,
        scanner: &Scanner,
        from: IpAddr,
        reply: bool,
        search_id: i32,
        message: &SsdpMessage,
    ) {
        let _ = (scanner, from, reply, search_id, message);
    }

    /// A sender matching the scanner's matcher said byebye
    fn on_message_byebye(
        &self,
        scanner: &Scanner,
        from: IpAddr,
        message: &SsdpMessage,
    ) {
        let _ = (scanner, from, message);
    }

    /// The search window for `search_id` elapsed
    ///
    /// Called exactly once per successful [`Scanner::search`] call,
    /// whether or not any messages arrived; by now every matching device
    /// should have answered.
    fn on_search_timed_out(&self, scanner: &Scanner, search_id: i32) {
        let _ = (scanner, search_id);
    }
}

/// A registered scan, created by [`Node::start_scan`]
///
/// The scanner passively receives matching NOTIFY traffic for as long as
/// it is registered; [`Scanner::search`] additionally solicits replies.
#[derive(Clone)]
pub struct Scanner {
    node: Node,
    key: ScannerKey,
}

impl Scanner {
    pub(crate) fn new(node: Node, key: ScannerKey) -> Self {
        Self { node, key }
    }

    /// Issue one M-SEARCH, identified by `search_id`
    ///
    /// A no-op while a previous search is still within its MX window.
    /// Returns true iff `search_id` is the search now outstanding, so a
    /// rejected concurrent search returns false (unless it happened to
    /// pass the already-active id). After the node's MX seconds the
    /// scanner returns to idle and
    /// [`ScanCallback::on_search_timed_out`] fires once.
    pub async fn search(&self, search_id: i32) -> bool {
        let state = {
            let scanners = self.node.inner.scanners.read().unwrap();
            scanners.get(self.key).cloned()
        };
        let Some(state) = state else {
            return false;
        };
        if state
            .current_search_id
            .compare_exchange(
                IDLE,
                search_id,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            self.node
                .inner
                .send_multicast(&state.matcher, SendKind::Search)
                .await;
            let mx = self.node.inner.config().mx;
            let scanner = self.clone();
            scheduler::one_shot(
                Duration::from_secs(u64::from(mx)),
                async move {
                    let old =
                        state.current_search_id.swap(IDLE, Ordering::SeqCst);
                    guarded(|| {
                        state.callback.on_search_timed_out(&scanner, old);
                    });
                },
            );
            return true;
        }
        state.current_search_id.load(Ordering::SeqCst) == search_id
    }

    /// Unregister this scanner from the node
    pub fn close(&self) {
        self.node.inner.scanners.write().unwrap().remove(self.key);
    }

    /// The node this scanner belongs to
    #[must_use]
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// The matcher this scanner was registered with
    ///
    /// `None` once the scanner has been closed.
    #[must_use]
    pub fn matcher(&self) -> Option<SsdpMessage> {
        self.node
            .inner
            .scanners
            .read()
            .unwrap()
            .get(self.key)
            .map(|s| s.matcher.clone())
    }
}
