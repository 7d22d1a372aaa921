// the cache controller: decodes addresses, services hits, initiates misses
// over the bus, reacts to snoops and installs miss data on completion

use log::{debug, info, warn};

use crate::bus::{BusReq, BusReqKind, SnoopBus};
use crate::coherence::CoherencePolicy;
use crate::commons::{AddrLayout, CacheId, CacheParams, Op};
use crate::error::{ConfigError, SimError};
use crate::event_q::EventQ;
use crate::eviction::EvictionPolicy;
use crate::mshr::Mshr;
use crate::sim::Action;

// a stalled access retries after this many ticks
const MSHR_STALL_BACKOFF: u64 = 8;

pub struct Line<C: CoherencePolicy> {
    pub tag: u64,
    pub valid: bool,
    pub state: C::State,
}

struct CacheSet<C: CoherencePolicy, E: EvictionPolicy> {
    ways: Vec<Line<C>>,
    eviction: E,
}

impl<C: CoherencePolicy, E: EvictionPolicy> CacheSet<C, E> {
    fn new(assoc: usize, init: C::State) -> Self {
        CacheSet {
            ways: (0..assoc)
                .map(|_| Line {
                    tag: 0,
                    valid: false,
                    state: init,
                })
                .collect(),
            eviction: E::default(),
        }
    }

    fn find(&self, tag: u64) -> Option<usize> {
        self.ways.iter().position(|l| l.valid && l.tag == tag)
    }

    fn touch(&mut self, way: usize) {
        self.eviction.touch(way);
    }

    fn choose_victim(&mut self) -> usize {
        let valid: Vec<bool> = self.ways.iter().map(|l| l.valid).collect();
        self.eviction.choose_victim(&valid)
    }
}

/// Per-cache event counters. `read_misses`/`write_misses` count every missed
/// access including the coalesced ones; `coalesced_misses` counts the subset
/// that merged into an outstanding MSHR entry.
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    pub read_hits: u64,
    pub read_misses: u64,
    pub write_hits: u64,
    pub write_misses: u64,
    pub coalesced_misses: u64,
    pub mshr_stalls: u64,
    pub snoops_received: u64,
    pub invalidations_received: u64,
    pub evictions: u64,
}

pub struct Cache<C: CoherencePolicy, E: EvictionPolicy> {
    id: CacheId,
    name: String,
    params: CacheParams,
    layout: AddrLayout,
    coherence: C,
    sets: Vec<CacheSet<C, E>>,
    mshr: Mshr,
    stats: CacheStats,
}

impl<C: CoherencePolicy, E: EvictionPolicy> Cache<C, E> {
    pub fn new(id: CacheId, name: &str, params: CacheParams) -> Result<Self, ConfigError> {
        let layout = params.layout()?;
        let coherence = C::default();
        let init = coherence.default_state();
        let sets = (0..params.num_sets)
            .map(|_| CacheSet::new(params.assoc, init))
            .collect();
        let mshr = Mshr::new(params.mshr_capacity);
        Ok(Cache {
            id,
            name: name.to_string(),
            layout,
            coherence,
            sets,
            mshr,
            stats: CacheStats::default(),
            params,
        })
    }

    // access paths

    pub fn read(
        &mut self,
        addr: u64,
        q: &mut EventQ<Action>,
        bus: &mut SnoopBus,
    ) -> Result<(), SimError> {
        let (set_idx, tag) = self.decode(addr)?;
        let readable = self.sets[set_idx]
            .find(tag)
            .map(|way| self.coherence.can_read(self.sets[set_idx].ways[way].state))
            .unwrap_or(false);
        if readable {
            self.stats.read_hits += 1;
            info!(
                "@ {:<6} Cache_{} :: READ_HIT for addr({:#x})",
                q.now(),
                self.name,
                addr
            );
            q.schedule(
                self.params.rd_hit_lt,
                Action::HitDone {
                    cache: self.id,
                    op: Op::Read,
                    addr,
                },
            );
            return Ok(());
        }
        self.stats.read_misses += 1;
        info!(
            "@ {:<6} Cache_{} :: READ_MISS for addr({:#x})",
            q.now(),
            self.name,
            addr
        );
        self.start_miss(Op::Read, set_idx, tag, addr, q, bus);
        Ok(())
    }

    pub fn write(
        &mut self,
        addr: u64,
        q: &mut EventQ<Action>,
        bus: &mut SnoopBus,
    ) -> Result<(), SimError> {
        let (set_idx, tag) = self.decode(addr)?;
        // a line invalidated in place is no longer readable and is handled
        // as a miss
        let state = self.sets[set_idx]
            .find(tag)
            .map(|way| self.sets[set_idx].ways[way].state)
            .filter(|&s| self.coherence.can_read(s));
        match state {
            Some(state) => {
                self.stats.write_hits += 1;
                info!(
                    "@ {:<6} Cache_{} :: WRITE_HIT for addr({:#x})",
                    q.now(),
                    self.name,
                    addr
                );
                if self.coherence.can_write(state) {
                    q.schedule(
                        self.params.wr_hit_lt,
                        Action::HitDone {
                            cache: self.id,
                            op: Op::Write,
                            addr,
                        },
                    );
                } else {
                    // shared: peers drop their copies before the write lands
                    bus.request_grant(
                        BusReq {
                            kind: BusReqKind::Invalidate,
                            source: self.id,
                            addr,
                            latency: self.params.snoop_lt,
                        },
                        q,
                    );
                }
            }
            None => {
                self.stats.write_misses += 1;
                info!(
                    "@ {:<6} Cache_{} :: WRITE_MISS for addr({:#x})",
                    q.now(),
                    self.name,
                    addr
                );
                self.start_miss(Op::Write, set_idx, tag, addr, q, bus);
            }
        }
        Ok(())
    }

    fn start_miss(
        &mut self,
        op: Op,
        set_idx: usize,
        tag: u64,
        addr: u64,
        q: &mut EventQ<Action>,
        bus: &mut SnoopBus,
    ) {
        // coalescing is keyed by tag only: a write merging into an
        // outstanding read miss resolves with that read's continuation
        if self.mshr.coalesce(tag).is_some() {
            self.stats.coalesced_misses += 1;
            info!(
                "@ {:<6} Cache_{} :: MSHR_COALESCE for addr({:#x})",
                q.now(),
                self.name,
                addr
            );
            return;
        }
        if !self.mshr.allocate(tag, set_idx) {
            self.stats.mshr_stalls += 1;
            warn!(
                "@ {:<6} Cache_{} :: MSHR full, stalling {:?} of addr({:#x}) for {} ticks",
                q.now(),
                self.name,
                op,
                addr,
                MSHR_STALL_BACKOFF
            );
            q.schedule(
                MSHR_STALL_BACKOFF,
                Action::Access {
                    cache: self.id,
                    op,
                    addr,
                },
            );
            return;
        }
        info!(
            "@ {:<6} Cache_{} :: MSHR_ALLOC for addr({:#x})",
            q.now(),
            self.name,
            addr
        );
        let kind = match op {
            Op::Read => BusReqKind::SnoopRead,
            Op::Write => BusReqKind::SnoopWrite,
        };
        bus.request_grant(
            BusReq {
                kind,
                source: self.id,
                addr,
                latency: self.params.snoop_lt,
            },
            q,
        );
    }

    // continuations

    /// Completes a hit after its latency: touch the way, apply the write
    /// transition for writes, and report the line.
    pub fn hit_done(&mut self, op: Op, addr: u64, q: &mut EventQ<Action>) {
        let Some((set_idx, tag)) = self.index(addr) else {
            return;
        };
        let Some(way) = self.sets[set_idx].find(tag) else {
            return;
        };
        match op {
            Op::Read => {
                self.sets[set_idx].touch(way);
                info!(
                    "@ {:<6} Cache_{} :: LINE RETURNED for addr({:#x})",
                    q.now(),
                    self.name,
                    addr
                );
            }
            Op::Write => {
                let old = self.sets[set_idx].ways[way].state;
                self.coherence
                    .on_write(&mut self.sets[set_idx].ways[way].state);
                let new = self.sets[set_idx].ways[way].state;
                self.sets[set_idx].touch(way);
                info!(
                    "@ {:<6} Cache_{} :: LINE WRITTEN for addr({:#x}) -- (state:{} --> {})",
                    q.now(),
                    self.name,
                    addr,
                    old,
                    new
                );
            }
        }
    }

    /// Installs the block once the miss data arrives, then retires the MSHR
    /// entry. All requests coalesced into the entry are satisfied here.
    pub fn miss_service(&mut self, op: Op, addr: u64, snoop_hit: bool, q: &mut EventQ<Action>) {
        let Some((set_idx, tag)) = self.index(addr) else {
            return;
        };
        let way = match self.sets[set_idx].find(tag) {
            // the tag can still be resident (e.g. invalidated in place);
            // reuse its way so a set never holds the same tag twice
            Some(way) => way,
            None => {
                let way = self.sets[set_idx].choose_victim();
                let victim = &self.sets[set_idx].ways[way];
                if victim.valid {
                    self.stats.evictions += 1;
                    if self.coherence.is_dirty(victim.state) {
                        // write-back traffic is elided by this model
                        debug!(
                            "@ {:<6} Cache_{} :: evicting dirty line tag({:#x}) from SET[{}]",
                            q.now(),
                            self.name,
                            victim.tag,
                            set_idx
                        );
                    }
                }
                way
            }
        };
        match op {
            Op::Read => {
                let line = &mut self.sets[set_idx].ways[way];
                line.tag = tag;
                line.valid = true;
                self.coherence.on_read_miss(&mut line.state, snoop_hit);
                self.sets[set_idx].touch(way);
                info!(
                    "@ {:<6} Cache_{} :: LINE RETURNED for addr({:#x})",
                    q.now(),
                    self.name,
                    addr
                );
            }
            Op::Write => {
                let line = &mut self.sets[set_idx].ways[way];
                line.tag = tag;
                line.valid = true;
                let old = line.state;
                self.coherence.on_write(&mut line.state);
                let new = line.state;
                self.sets[set_idx].touch(way);
                info!(
                    "@ {:<6} Cache_{} :: LINE WRITTEN for addr({:#x}) -- (state:{} --> {})",
                    q.now(),
                    self.name,
                    addr,
                    old,
                    new
                );
            }
        }
        self.mshr.remove(tag);
    }

    // bus completion callbacks

    /// The snoop round for a read miss finished; schedule the data service.
    /// A peer source is faster than main memory.
    pub fn read_miss_serviced(&mut self, addr: u64, snoop_hit: bool, q: &mut EventQ<Action>) {
        let lt = if snoop_hit {
            self.params.snoop_hit_lt
        } else {
            self.params.rd_miss_lt
        };
        q.schedule(
            lt,
            Action::MissService {
                cache: self.id,
                op: Op::Read,
                addr,
                snoop_hit,
            },
        );
    }

    /// The snoop round for a write miss finished; schedule the data service.
    pub fn write_miss_serviced(&mut self, addr: u64, snoop_hit: bool, q: &mut EventQ<Action>) {
        let lt = if snoop_hit {
            self.params.snoop_hit_lt
        } else {
            self.params.wr_miss_lt
        };
        q.schedule(
            lt,
            Action::MissService {
                cache: self.id,
                op: Op::Write,
                addr,
                snoop_hit,
            },
        );
    }

    /// Peers have been invalidated; the stalled shared-state write hit may
    /// now complete.
    pub fn upgrade_granted(&mut self, addr: u64, q: &mut EventQ<Action>) {
        q.schedule(
            self.params.wr_hit_lt,
            Action::HitDone {
                cache: self.id,
                op: Op::Write,
                addr,
            },
        );
    }

    // snoop entrypoints, invoked synchronously from bus-scheduled events

    pub fn snoop_read(&mut self, addr: u64) -> bool {
        self.stats.snoops_received += 1;
        let Some((set_idx, way)) = self.resident_way(addr) else {
            return false;
        };
        self.coherence
            .on_snoop_read(&mut self.sets[set_idx].ways[way].state);
        true
    }

    pub fn snoop_write(&mut self, addr: u64) -> bool {
        self.stats.snoops_received += 1;
        let Some((set_idx, way)) = self.resident_way(addr) else {
            return false;
        };
        self.coherence
            .on_snoop_write(&mut self.sets[set_idx].ways[way].state);
        self.stats.invalidations_received += 1;
        true
    }

    // helpers

    fn resident_way(&self, addr: u64) -> Option<(usize, usize)> {
        let (set_idx, tag) = self.index(addr)?;
        let way = self.sets[set_idx].find(tag)?;
        Some((set_idx, way))
    }

    fn index(&self, addr: u64) -> Option<(usize, u64)> {
        if addr >= self.params.mm_size {
            return None;
        }
        Some(self.layout.decode(addr))
    }

    fn decode(&self, addr: u64) -> Result<(usize, u64), SimError> {
        self.index(addr).ok_or_else(|| SimError::AddressOutOfRange {
            cache: self.name.clone(),
            addr,
            mm_size: self.params.mm_size,
        })
    }

    // observers

    pub fn id(&self) -> CacheId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &CacheParams {
        &self.params
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Coherence state of the resident line covering `addr`, if any.
    pub fn line_state(&self, addr: u64) -> Option<C::State> {
        let (set_idx, way) = self.resident_way(addr)?;
        Some(self.sets[set_idx].ways[way].state)
    }

    pub fn outstanding_misses(&self) -> usize {
        self.mshr.len()
    }
}
