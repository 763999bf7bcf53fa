//! `UPipe`/`UPipeManager`: the pipe itself (spec.md §2 "UPipe / UPipe
//! manager (20%)", §4.5).
//!
//! The C vtable (`alloc`/`input`/`control`/`destroy`) becomes a trait,
//! [`UPipeImpl`], implemented per pipe kind; the "opaque" private-state
//! slot the C struct carries as a `void *` is just whatever fields the
//! implementing type owns directly. Shared bookkeeping every pipe needs
//! regardless of kind — output link, flow-def, pending requests, probe
//! chain, sub-pipe table — lives in [`PipeCommon`], which every
//! `UPipeImpl` method receives alongside its own state so it never has
//! to re-enter the pipe's own lock to reach them.

use crate::error::UResult;
use crate::probe::{CatchResult, UEvent, UProbe};
use crate::request::URequest;
use crate::uref::URef;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Control commands every pipe understands in common (spec.md §4.5:
/// "get/set_flow_def, get/set_output, register_request,
/// unregister_request, attach_upump_mgr, attach_uclock, sub_get_super,
/// iterate_sub, bin_get_first/last_inner, bin_freeze/thaw"), plus an
/// escape hatch for manager-specific, signature-namespaced commands.
pub enum ControlCommand {
    SetFlowDef(URef),
    GetFlowDef,
    SetOutput(Option<UPipe>),
    GetOutput,
    RegisterRequest(Arc<URequest>),
    UnregisterRequest(Arc<URequest>),
    AttachUpumpMgr(Arc<crate::pump::UPumpManager>),
    AttachUclock(Arc<dyn crate::clock::UClock>),
    SubGetSuper,
    IterateSub,
    BinGetFirstInner,
    BinGetLastInner,
    BinFreeze,
    BinThaw,
    /// `(signature, payload)`: a command namespaced to one manager kind.
    Custom(u32, crate::dict::UDict),
}

/// Bookkeeping shared by every pipe instance, independent of its kind.
pub struct PipeCommon {
    probe: UProbe,
    output: Option<UPipe>,
    flow_def: Option<URef>,
    pending_requests: crate::request::PendingRequests,
    upump_mgr: Option<Arc<crate::pump::UPumpManager>>,
    uclock: Option<Arc<dyn crate::clock::UClock>>,
    sub_pipes: Vec<UPipe>,
    super_pipe: Option<Weak<Mutex<UPipeInner>>>,
    bin_first_inner: Option<UPipe>,
    bin_last_inner: Option<UPipe>,
    bin_frozen: bool,
    dead: bool,
}

impl PipeCommon {
    fn new(probe: UProbe) -> Self {
        Self {
            probe,
            output: None,
            flow_def: None,
            pending_requests: crate::request::PendingRequests::new(),
            upump_mgr: None,
            uclock: None,
            sub_pipes: Vec::new(),
            super_pipe: None,
            bin_first_inner: None,
            bin_last_inner: None,
            bin_frozen: false,
            dead: false,
        }
    }

    /// Throw an event up this pipe's probe chain.
    pub fn throw(&self, event: &UEvent) -> CatchResult {
        self.probe.throw(event)
    }

    pub fn output(&self) -> Option<&UPipe> {
        self.output.as_ref()
    }

    /// Set a new output, releasing the old one (spec.md invariant 5).
    pub fn set_output(&mut self, output: Option<UPipe>) {
        self.output = output;
        if self.output.is_none() {
            self.throw(&UEvent::NeedOutput);
        }
    }

    pub fn flow_def(&self) -> Option<&URef> {
        self.flow_def.as_ref()
    }

    /// Inspect and store a copy of an incoming flow-def uref without
    /// retaining the original by reference (spec.md invariant 3).
    pub fn store_flow_def(&mut self, flow_def: URef) {
        self.flow_def = Some(flow_def.dup());
        self.throw(&UEvent::NewFlowDef);
    }

    pub fn register_request(&mut self, request: Arc<URequest>) {
        self.pending_requests.register(request);
    }

    pub fn unregister_request(&mut self, request: &Arc<URequest>) -> bool {
        self.pending_requests.unregister(request)
    }

    pub fn pending_requests(&self) -> &crate::request::PendingRequests {
        &self.pending_requests
    }

    pub fn attach_upump_mgr(&mut self, mgr: Arc<crate::pump::UPumpManager>) {
        self.upump_mgr = Some(mgr);
    }

    pub fn attach_uclock(&mut self, clock: Arc<dyn crate::clock::UClock>) {
        self.uclock = Some(clock);
    }

    pub fn uclock(&self) -> Option<&Arc<dyn crate::clock::UClock>> {
        self.uclock.as_ref()
    }

    /// List this pipe's sub-pipes, if it's a super-pipe.
    pub fn iterate_sub(&self) -> impl Iterator<Item = &UPipe> {
        self.sub_pipes.iter()
    }

    /// A weak handle back to the super-pipe owning this sub-pipe, if any
    /// (spec.md invariant 6: sub-to-super references are weak).
    pub fn super_pipe(&self) -> Option<UPipe> {
        self.super_pipe.as_ref().and_then(Weak::upgrade).map(UPipe)
    }

    pub fn bin_first_inner(&self) -> Option<&UPipe> {
        self.bin_first_inner.as_ref()
    }

    pub fn bin_last_inner(&self) -> Option<&UPipe> {
        self.bin_last_inner.as_ref()
    }

    pub fn set_bin_inner(&mut self, first: Option<UPipe>, last: Option<UPipe>) {
        self.bin_first_inner = first;
        self.bin_last_inner = last;
    }

    /// Prevent external walkers (e.g. `UDump`) from racing against
    /// internal bin reconfiguration.
    pub fn bin_freeze(&mut self) {
        self.bin_frozen = true;
    }

    pub fn bin_thaw(&mut self) {
        self.bin_frozen = false;
    }

    pub fn bin_frozen(&self) -> bool {
        self.bin_frozen
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }
}

/// The vtable every pipe kind implements: `input`/`control` from the
/// C API (`alloc` is [`UPipeManager::alloc`]; `destroy` is driven by
/// `Drop` on [`UPipeInner`]).
pub trait UPipeImpl: Send {
    fn input(&mut self, uref: URef, common: &mut PipeCommon);
    fn control(&mut self, command: ControlCommand, common: &mut PipeCommon) -> UResult;
    /// Run just before the pipe's last reference is released. Default
    /// is a no-op; override to flush internal state.
    fn destroy(&mut self, _common: &mut PipeCommon) {}
}

struct UPipeInner {
    common: PipeCommon,
    impl_: Box<dyn UPipeImpl>,
}

impl Drop for UPipeInner {
    fn drop(&mut self) {
        if !self.common.dead {
            self.common.dead = true;
            self.common.throw(&UEvent::Dead);
            self.impl_.destroy(&mut self.common);
        }
    }
}

/// A reference-counted handle to a pipe instance. Cloning aliases the
/// same pipe; the pipe's destructor (`Drop` on [`UPipeInner`]) runs on
/// whichever thread drops the last handle, matching spec.md invariant 2.
pub struct UPipe(Arc<Mutex<UPipeInner>>);

impl Clone for UPipe {
    fn clone(&self) -> Self {
        UPipe(Arc::clone(&self.0))
    }
}

impl UPipe {
    fn lock(&self) -> MutexGuard<'_, UPipeInner> {
        self.0.lock().expect("pipe mutex poisoned")
    }

    /// A stable identity for this pipe, shared by every `UPipe` handle
    /// cloned from the same instance. Used by `UDump` to detect a pipe
    /// reached through more than one path (e.g. a shared sink) without
    /// revisiting it, since comparing `&UPipe` addresses would instead
    /// compare the addresses of transient handle values.
    pub fn identity(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }

    /// Push a uref into this pipe's `input` handler. Throws `Ready` the
    /// first time a pipe receives input after construction is left to
    /// the manager's `alloc` closure, matching "ready/dead events fired
    /// at construction" (spec.md lifecycles).
    pub fn input(&self, uref: URef) {
        let mut guard = self.lock();
        let UPipeInner { common, impl_ } = &mut *guard;
        impl_.input(uref, common);
    }

    pub fn control(&self, command: ControlCommand) -> UResult {
        let mut guard = self.lock();
        let UPipeInner { common, impl_ } = &mut *guard;
        impl_.control(command, common)
    }

    pub fn set_output(&self, output: Option<UPipe>) {
        self.lock().common.set_output(output);
    }

    pub fn output(&self) -> Option<UPipe> {
        self.lock().common.output().cloned()
    }

    pub fn flow_def(&self) -> Option<URef> {
        self.lock().common.flow_def().map(URef::dup)
    }

    pub fn throw(&self, event: &UEvent) -> CatchResult {
        self.lock().common.throw(event)
    }

    pub fn is_dead(&self) -> bool {
        self.lock().common.is_dead()
    }

    pub fn iterate_sub(&self) -> Vec<UPipe> {
        self.lock().common.iterate_sub().cloned().collect()
    }

    pub fn super_pipe(&self) -> Option<UPipe> {
        self.lock().common.super_pipe()
    }

    fn add_sub(&self, sub: &UPipe) {
        self.lock().common.sub_pipes.push(sub.clone());
    }

    /// Detach `sub` from this pipe's sub-pipe table (spec.md invariant 6:
    /// sub-to-super references are weak, so dropping the super's handle
    /// here is what actually releases the sub-pipe once nobody else
    /// holds it). A no-op if `sub` is not currently in the table.
    pub fn remove_sub(&self, sub: &UPipe) {
        self.lock().common.sub_pipes.retain(|p| p.identity() != sub.identity());
    }

    fn set_super(&self, super_pipe: &UPipe) {
        self.lock().common.super_pipe = Some(Arc::downgrade(&super_pipe.0));
    }
}

/// A pipe kind's shared configuration plus its constructor (spec.md
/// §3: "UPipe manager: { refcount, signature, alloc, input, control,
/// mgr_control, err/command/event label tables }"). `input`/`control`
/// live on [`UPipeImpl`] instances themselves rather than on the
/// manager, since Rust dispatches them through the trait object
/// instead of C's per-call vtable indirection.
pub struct UPipeManager {
    signature: u32,
    alloc: Box<dyn Fn() -> Box<dyn UPipeImpl> + Send + Sync>,
    event_labels: fnv::FnvHashMap<u32, &'static str>,
}

impl UPipeManager {
    pub fn new(
        signature: u32,
        alloc: impl Fn() -> Box<dyn UPipeImpl> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self { signature, alloc: Box::new(alloc), event_labels: fnv::FnvHashMap::default() })
    }

    pub fn with_event_labels(mut self, labels: impl IntoIterator<Item = (u32, &'static str)>) -> Self {
        self.event_labels.extend(labels);
        self
    }

    pub fn signature(&self) -> u32 {
        self.signature
    }

    pub fn event_label(&self, code: u32) -> Option<&'static str> {
        self.event_labels.get(&code).copied()
    }

    /// Construct a new pipe instance, firing `Ready` once its probe
    /// chain is wired (spec.md lifecycles: "ready/dead events fired at
    /// construction").
    pub fn alloc(&self, probe: UProbe) -> UPipe {
        let impl_ = (self.alloc)();
        let pipe = UPipe(Arc::new(Mutex::new(UPipeInner { common: PipeCommon::new(probe), impl_ })));
        pipe.throw(&UEvent::Ready);
        pipe
    }

    /// Construct a sub-pipe of `super_pipe`, registering it in the
    /// super's sub-pipe table and setting the sub's weak back-reference
    /// (spec.md §4.5 "Split pipes": `flow_alloc_sub(super, probe,
    /// flow_def)`). Returns the new sub-pipe's handle so the caller can
    /// later detach it via [`UPipe::remove_sub`].
    pub fn flow_alloc_sub(&self, super_pipe: &UPipe, probe: UProbe, flow_def: URef) -> Result<UPipe, crate::error::UError> {
        let sub = self.alloc(probe);
        sub.control(ControlCommand::SetFlowDef(flow_def))?;
        super_pipe.add_sub(&sub);
        sub.set_super(super_pipe);
        super_pipe.throw(&UEvent::SplitUpdate);
        Ok(sub)
    }
}
