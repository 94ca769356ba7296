//! Swivel: a virtual playback device over a swappable slave sink.
//!
//! The workspace splits into three crates, re-exported here:
//! - [`ring`]: cursor arithmetic and the shared frame ring.
//! - [`pcm`]: the playback engine (negotiation, mover thread, readiness
//!   notifier, lifecycle state machine).
//! - [`ctl`]: the mixer control surface a panel talks to.
//!
//! The common entry points are lifted to the crate root.

pub use swivel_ctl as ctl;
pub use swivel_pcm as pcm;
pub use swivel_ring as ring;

pub use swivel_pcm::{
    HwParams, HwRequest, MemorySlave, PollFlags, RelayConfig, RelayError, RelayStats, RunState,
    SampleFormat, SlavePcm, VirtualPcm,
};
