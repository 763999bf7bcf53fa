//! Pipeline substrate for a modular, event-driven media streaming
//! framework: reference-counted buffers, a pipe graph, a bidirectional
//! probe/event plane, pool-based memory management, and a
//! single-thread-per-pump scheduler.
//!
//! This crate is the CORE only: codec implementations, protocol
//! demuxers/muxers, and platform I/O glue are external collaborators
//! built on top of the traits and types exposed here (`UPipeImpl`,
//! `UBufBackend`, `UClock`, `UMemBackend`).

pub mod buffer;
pub mod chain;
pub mod clock;
pub mod dejitter;
pub mod dict;
pub mod dump;
pub mod error;
pub mod gc;
pub mod mem;
pub mod pipe;
pub mod pool;
pub mod probe;
pub mod pump;
pub mod queue;
pub mod refcount;
pub mod request;
pub mod selflow;
pub mod uref;

pub use buffer::{block, picture, sound, PooledMem, UBuf};
pub use chain::{ChainId, UChain};
pub use clock::{SystemClock, UClock, UClockTs, UCLOCK_FREQ, UCLOCK_INVALID};
pub use dejitter::{DejitterConfig, DriftRate, UProbeDejitter};
pub use dict::{UDict, UDictValue};
pub use dump::dump;
pub use error::{UError, UResult};
pub use mem::{ArenaBackend, HeapBackend, UMem, UMemBackend};
pub use pipe::{ControlCommand, PipeCommon, UPipe, UPipeImpl, UPipeManager};
pub use pool::{ULifo, UPool};
pub use probe::{CatchResult, FnCatcher, LogProbe, ManagerProbe, PrefixProbe, UEvent, UProbe, UProbeCatcher};
pub use pump::{
    pump_waker, PumpId, PumpWaker, PumpWakerSource, QueuePoll, RealtimePumpThread, UPumpBlocker, UPumpManager,
    UPumpSource,
};
pub use queue::{uqueue, UQueueReceiver, UQueueSender};
pub use refcount::URefCount;
pub use request::{PendingRequests, RequestFlags, URequest, URequestAnswer, URequestKind};
pub use selflow::{FlowType, UProbeSelflow};
pub use uref::{flow_def, URef};
