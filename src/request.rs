//! `URequest`: a unidirectional capability-negotiation request that
//! travels upstream, sink to source (spec.md §2 "URequest (5%)", §4.10).
//!
//! A sink allocates a request and registers it with its upstream pipe.
//! Each upstream pipe either answers it locally (calling `provide`
//! synchronously) or forwards it further upstream by keeping it on its
//! own pending list. Unregistering walks the same chain symmetrically.

use crate::clock::UClockTs;
use crate::error::UError;
use crate::uref::URef;
use bitflags::bitflags;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

bitflags! {
    /// Lifecycle bits tracked alongside a pending request, set with
    /// relaxed atomics since they are advisory bookkeeping rather than a
    /// synchronization point (the actual answer delivery goes through
    /// the `provide` callback). Grounded on the teacher's
    /// `host_request::RequestFlags` (also a bitflags-backed request
    /// state word set from multiple call sites).
    pub struct RequestFlags: u32 {
        /// Registered with an upstream pipe's pending-request list.
        const REGISTERED = 1 << 0;
        /// Forwarded at least once further upstream rather than
        /// answered locally.
        const FORWARDED  = 1 << 1;
        /// `provide` has already fired; a second call would be a bug.
        const ANSWERED   = 1 << 2;
    }
}

/// What capability a request is asking for (spec.md §3: "Types:
/// UREF_MGR, UBUF_MGR, UCLOCK, FLOW_FORMAT, SINK_LATENCY").
#[derive(Debug, Clone)]
pub enum URequestKind {
    /// A uref manager/allocator.
    UrefMgr,
    /// A ubuf manager able to satisfy the accompanying flow-def hint.
    UbufMgr,
    /// A clock implementation.
    Uclock,
    /// An amended flow format: the hint uref describes what the
    /// requester wants, the answer is an amended uref.
    FlowFormat,
    /// The minimum latency a sink needs upstream pipes to guarantee.
    SinkLatency { min: UClockTs },
}

/// What an upstream pipe hands back when it answers a request locally.
#[derive(Debug, Clone)]
pub enum URequestAnswer {
    FlowFormat(Arc<URef>),
    Latency(UClockTs),
    Accepted,
}

/// A registered capability request. `provide` is called synchronously
/// by whichever pipe answers it — there is no async round trip, matching
/// the original library's single-threaded-per-pipe assumption.
pub struct URequest {
    kind: URequestKind,
    hint: Option<Arc<URef>>,
    provide: Box<dyn Fn(Result<URequestAnswer, UError>) + Send + Sync>,
    flags: AtomicU32,
}

impl URequest {
    pub fn new(
        kind: URequestKind,
        hint: Option<Arc<URef>>,
        provide: impl Fn(Result<URequestAnswer, UError>) + Send + Sync + 'static,
    ) -> Self {
        Self { kind, hint, provide: Box::new(provide), flags: AtomicU32::new(0) }
    }

    pub fn kind(&self) -> &URequestKind {
        &self.kind
    }

    pub fn hint(&self) -> Option<&Arc<URef>> {
        self.hint.as_ref()
    }

    pub fn flags(&self) -> RequestFlags {
        RequestFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed))
    }

    fn set_flag(&self, flag: RequestFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::Relaxed);
    }

    /// Mark as forwarded to a further-upstream pipe rather than answered
    /// locally (spec.md §4.10's "forwards the request further upstream").
    pub fn mark_forwarded(&self) {
        self.set_flag(RequestFlags::FORWARDED);
    }

    /// Answer the request, invoking its `provide` callback exactly once.
    pub fn provide(&self, answer: Result<URequestAnswer, UError>) {
        self.set_flag(RequestFlags::ANSWERED);
        (self.provide)(answer);
    }
}

/// A pending-request list, owned by a pipe that could not answer a
/// request locally and must forward it upstream (spec.md §4.10:
/// "forwards the request further upstream by storing it in its own
/// pending-request list").
#[derive(Default)]
pub struct PendingRequests {
    requests: Vec<Arc<URequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, request: Arc<URequest>) {
        request.set_flag(RequestFlags::REGISTERED);
        self.requests.push(request);
    }

    /// Unregister by pointer identity. Returns `true` if a matching
    /// entry was found and removed.
    pub fn unregister(&mut self, request: &Arc<URequest>) -> bool {
        let before = self.requests.len();
        self.requests.retain(|r| !Arc::ptr_eq(r, request));
        self.requests.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<URequest>> {
        self.requests.iter()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn provide_invokes_callback_once() {
        let answered = Arc::new(AtomicBool::new(false));
        let a = Arc::clone(&answered);
        let request = URequest::new(URequestKind::Uclock, None, move |_| {
            a.store(true, Ordering::SeqCst);
        });
        request.provide(Ok(URequestAnswer::Accepted));
        assert!(answered.load(Ordering::SeqCst));
        assert!(request.flags().contains(RequestFlags::ANSWERED));
    }

    #[test]
    fn register_sets_registered_flag_and_forward_sets_forwarded() {
        let request = Arc::new(URequest::new(URequestKind::Uclock, None, |_| {}));
        let mut pending = PendingRequests::new();
        pending.register(Arc::clone(&request));
        assert!(request.flags().contains(RequestFlags::REGISTERED));
        assert!(!request.flags().contains(RequestFlags::FORWARDED));

        request.mark_forwarded();
        assert!(request.flags().contains(RequestFlags::FORWARDED));
        assert!(!request.flags().contains(RequestFlags::ANSWERED));
    }

    #[test]
    fn register_and_unregister_round_trip() {
        let mut pending = PendingRequests::new();
        let request = Arc::new(URequest::new(URequestKind::Uclock, None, |_| {}));
        pending.register(Arc::clone(&request));
        assert_eq!(pending.len(), 1);
        assert!(pending.unregister(&request));
        assert!(pending.is_empty());
    }

    #[test]
    fn unregister_unknown_request_is_noop() {
        let mut pending = PendingRequests::new();
        let request = Arc::new(URequest::new(URequestKind::Uclock, None, |_| {}));
        assert!(!pending.unregister(&request));
    }
}
