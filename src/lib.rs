/*
    An event-driven simulator for snoopy, bus-based multi-cache systems
    under the MESI (Illinois) write-invalidate coherence protocol.

    Every operation is non-blocking: it classifies the access, schedules a
    continuation on the event queue (directly for hits, through a serialized
    snoop-bus round for misses and upgrades) and returns. Outstanding misses
    are tracked in an MSHR table that coalesces duplicates.
*/

pub mod bus;
pub mod cache;
pub mod coherence;
pub mod commons;
pub mod error;
pub mod event_q;
pub mod eviction;
pub mod mshr;
pub mod sim;
pub mod utils;

pub use bus::{BusReq, BusReqKind, SnoopBus};
pub use cache::{Cache, CacheStats};
pub use coherence::{CoherencePolicy, Mesi, MesiState};
pub use commons::{CacheId, CacheParams, Op, TraceEntry};
pub use error::{ConfigError, SimError, TraceError};
pub use event_q::EventQ;
pub use eviction::{EvictionPolicy, Lru};
pub use sim::{Action, MesiLruSim, Simulation};
