// the simulation owner: wires caches and bus together and routes every
// scheduled action to the component it belongs to

use crate::bus::{BusReq, BusReqKind, ReqId, SnoopBus};
use crate::cache::Cache;
use crate::coherence::{CoherencePolicy, Mesi};
use crate::commons::{CacheId, CacheParams, Op, TraceEntry};
use crate::error::{ConfigError, SimError};
use crate::event_q::EventQ;
use crate::eviction::{EvictionPolicy, Lru};

/// A deferred continuation. Every suspension point in the model schedules
/// one of these; the dispatch loop resolves the ids against the owning
/// tables instead of capturing references.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Action {
    /// An access entering a cache, from the trace or a stalled retry.
    Access { cache: CacheId, op: Op, addr: u64 },
    /// A hit (or granted write upgrade) completing after its latency.
    HitDone { cache: CacheId, op: Op, addr: u64 },
    /// Miss data arriving: install the block and retire the MSHR entry.
    MissService {
        cache: CacheId,
        op: Op,
        addr: u64,
        snoop_hit: bool,
    },
    /// One peer answering an in-flight broadcast.
    SnoopResponse { req: ReqId, cache: CacheId },
    /// A broadcast with no responders, or a data service, running out its
    /// latency.
    BroadcastDone { req: ReqId },
    /// The bus picking up the next queued request.
    BusProcessNext,
}

pub struct Simulation<C: CoherencePolicy, E: EvictionPolicy> {
    event_q: EventQ<Action>,
    bus: SnoopBus,
    caches: Vec<Cache<C, E>>,
}

pub type MesiLruSim = Simulation<Mesi, Lru>;

impl<C: CoherencePolicy, E: EvictionPolicy> Simulation<C, E> {
    pub fn new() -> Self {
        Simulation {
            event_q: EventQ::new(),
            bus: SnoopBus::new(),
            caches: Vec::new(),
        }
    }

    /// Builds a cache and registers it on the bus. The returned id is the
    /// cache's index in trace entries.
    pub fn add_cache(&mut self, name: &str, params: CacheParams) -> Result<CacheId, ConfigError> {
        let id = self.caches.len();
        let cache = Cache::new(id, name, params)?;
        self.bus.register_cache(id, name);
        self.caches.push(cache);
        Ok(id)
    }

    /// Schedules one access at absolute virtual time `at`. Call before
    /// `run()`, while the clock is still at zero.
    pub fn schedule_access(&mut self, at: u64, cache: CacheId, op: Op, addr: u64) {
        let delay = at.saturating_sub(self.event_q.now());
        self.event_q
            .schedule(delay, Action::Access { cache, op, addr });
    }

    pub fn schedule_trace(&mut self, trace: &[TraceEntry]) {
        for entry in trace {
            self.schedule_access(entry.at, entry.cache, entry.op, entry.addr);
        }
    }

    /// Runs to quiescence: dispatches events in time order until the queue
    /// is empty. An empty queue is normal termination.
    pub fn run(&mut self) -> Result<(), SimError> {
        while let Some(action) = self.event_q.pop() {
            self.dispatch(action)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, action: Action) -> Result<(), SimError> {
        match action {
            Action::Access { cache, op, addr } => match self.caches.get_mut(cache) {
                Some(c) => match op {
                    Op::Read => c.read(addr, &mut self.event_q, &mut self.bus),
                    Op::Write => c.write(addr, &mut self.event_q, &mut self.bus),
                },
                None => Err(SimError::UnknownCache { id: cache }),
            },
            Action::HitDone { cache, op, addr } => match self.caches.get_mut(cache) {
                Some(c) => {
                    c.hit_done(op, addr, &mut self.event_q);
                    Ok(())
                }
                None => Err(SimError::UnknownCache { id: cache }),
            },
            Action::MissService {
                cache,
                op,
                addr,
                snoop_hit,
            } => match self.caches.get_mut(cache) {
                Some(c) => {
                    c.miss_service(op, addr, snoop_hit, &mut self.event_q);
                    Ok(())
                }
                None => Err(SimError::UnknownCache { id: cache }),
            },
            Action::SnoopResponse { req, cache } => {
                let Some((kind, addr)) = self.bus.snoop_target(req) else {
                    return Ok(());
                };
                let Some(c) = self.caches.get_mut(cache) else {
                    return Err(SimError::UnknownCache { id: cache });
                };
                let hit = match kind {
                    BusReqKind::SnoopWrite | BusReqKind::Invalidate => c.snoop_write(addr),
                    _ => c.snoop_read(addr),
                };
                if let Some((breq, any_hit)) =
                    self.bus.note_response(req, cache, hit, &mut self.event_q)
                {
                    self.complete(breq, any_hit)?;
                }
                Ok(())
            }
            Action::BroadcastDone { req } => {
                if let Some((breq, any_hit)) = self.bus.finish(req, &mut self.event_q) {
                    self.complete(breq, any_hit)?;
                }
                Ok(())
            }
            Action::BusProcessNext => {
                self.bus.process_next(&mut self.event_q);
                Ok(())
            }
        }
    }

    /// Invokes the requestor's completion for a finished bus request,
    /// exactly once per request.
    fn complete(&mut self, req: BusReq, snoop_hit: bool) -> Result<(), SimError> {
        let Some(cache) = self.caches.get_mut(req.source) else {
            return Err(SimError::UnknownCache { id: req.source });
        };
        match req.kind {
            BusReqKind::SnoopRead => cache.read_miss_serviced(req.addr, snoop_hit, &mut self.event_q),
            BusReqKind::SnoopWrite => {
                cache.write_miss_serviced(req.addr, snoop_hit, &mut self.event_q)
            }
            BusReqKind::Invalidate => cache.upgrade_granted(req.addr, &mut self.event_q),
            // the controller folds the data-service latency into the miss
            // continuation and never submits these kinds itself
            BusReqKind::ReadMissService | BusReqKind::WriteMissService => (),
        }
        Ok(())
    }

    // observers

    pub fn now(&self) -> u64 {
        self.event_q.now()
    }

    pub fn cache(&self, id: CacheId) -> &Cache<C, E> {
        &self.caches[id]
    }

    pub fn caches(&self) -> &[Cache<C, E>] {
        &self.caches
    }

    pub fn bus(&self) -> &SnoopBus {
        &self.bus
    }
}

impl<C: CoherencePolicy, E: EvictionPolicy> Default for Simulation<C, E> {
    fn default() -> Self {
        Self::new()
    }
}
