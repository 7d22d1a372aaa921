// the snoop bus: serializes requests, fans broadcasts out to peer caches,
// aggregates their responses and hands the result back to the requestor

use std::collections::{HashMap, VecDeque};
use std::fmt;

use log::info;

use crate::commons::CacheId;
use crate::event_q::EventQ;
use crate::sim::Action;

pub type ReqId = u64;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BusReqKind {
    SnoopRead,
    SnoopWrite,
    ReadMissService,
    WriteMissService,
    Invalidate,
}

impl fmt::Display for BusReqKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BusReqKind::SnoopRead => "SNOOP_READ",
            BusReqKind::SnoopWrite => "SNOOP_WRITE",
            BusReqKind::ReadMissService => "READ_MISS_SERVICE",
            BusReqKind::WriteMissService => "WRITE_MISS_SERVICE",
            BusReqKind::Invalidate => "INVALIDATE",
        };
        f.write_str(s)
    }
}

/// A queued bus request. Completion is dispatched back to the source cache
/// by kind once the broadcast (or data service) has finished.
#[derive(Clone, Copy, Debug)]
pub struct BusReq {
    pub kind: BusReqKind,
    pub source: CacheId,
    pub addr: u64,
    pub latency: u64,
}

// aggregation state for one in-flight request
struct Inflight {
    req: BusReq,
    remaining: usize,
    any_hit: bool,
}

pub struct SnoopBus {
    queue: VecDeque<BusReq>,
    busy: bool,
    // registration order fixes the responder order within a broadcast
    peers: Vec<(CacheId, String)>,
    inflight: HashMap<ReqId, Inflight>,
    next_req: ReqId,
    requests_served: u64,
}

impl SnoopBus {
    pub fn new() -> Self {
        SnoopBus {
            queue: VecDeque::new(),
            busy: false,
            peers: Vec::new(),
            inflight: HashMap::new(),
            next_req: 0,
            requests_served: 0,
        }
    }

    pub fn register_cache(&mut self, id: CacheId, name: &str) {
        self.peers.push((id, name.to_string()));
    }

    /// Queues `req`; if the bus is idle, starts serving at the current
    /// instant. Exactly one request is in flight at any time.
    pub fn request_grant(&mut self, req: BusReq, q: &mut EventQ<Action>) {
        self.queue.push_back(req);
        if !self.busy {
            self.busy = true;
            q.schedule(0, Action::BusProcessNext);
        }
    }

    /// Serves the head of the queue, or goes idle when it is empty. Called
    /// once per completed request, from the completion path.
    pub fn process_next(&mut self, q: &mut EventQ<Action>) {
        let Some(req) = self.queue.pop_front() else {
            self.busy = false;
            return;
        };
        self.requests_served += 1;
        info!(
            "@ {:<6} BUS :: Processing {} from Cache_{} addr({:#x})",
            q.now(),
            req.kind,
            self.name_of(req.source),
            req.addr
        );
        match req.kind {
            BusReqKind::SnoopRead | BusReqKind::SnoopWrite | BusReqKind::Invalidate => {
                self.start_broadcast(req, q)
            }
            BusReqKind::ReadMissService | BusReqKind::WriteMissService => {
                // simulated memory/owner source: always succeeds after the
                // requested latency
                let id = self.alloc_req_id();
                self.inflight.insert(
                    id,
                    Inflight {
                        req,
                        remaining: 0,
                        any_hit: true,
                    },
                );
                q.schedule(req.latency, Action::BroadcastDone { req: id });
            }
        }
    }

    fn start_broadcast(&mut self, req: BusReq, q: &mut EventQ<Action>) {
        let targets: Vec<CacheId> = self
            .peers
            .iter()
            .map(|(id, _)| *id)
            .filter(|&id| id != req.source)
            .collect();
        let id = self.alloc_req_id();
        if targets.is_empty() {
            self.inflight.insert(
                id,
                Inflight {
                    req,
                    remaining: 0,
                    any_hit: false,
                },
            );
            q.schedule(req.latency, Action::BroadcastDone { req: id });
            return;
        }
        self.inflight.insert(
            id,
            Inflight {
                req,
                remaining: targets.len(),
                // invalidation acks are not data responses; delivery to every
                // peer counts as success
                any_hit: req.kind == BusReqKind::Invalidate,
            },
        );
        for target in targets {
            q.schedule(req.latency, Action::SnoopResponse { req: id, cache: target });
        }
    }

    /// Kind and address of an in-flight request, for dispatching a responder.
    pub fn snoop_target(&self, id: ReqId) -> Option<(BusReqKind, u64)> {
        self.inflight.get(&id).map(|inf| (inf.req.kind, inf.req.addr))
    }

    /// Records one responder's answer. On the final responder, completes the
    /// request and returns it with the aggregated result.
    pub fn note_response(
        &mut self,
        id: ReqId,
        responder: CacheId,
        hit: bool,
        q: &mut EventQ<Action>,
    ) -> Option<(BusReq, bool)> {
        {
            let inf = self.inflight.get_mut(&id)?;
            inf.any_hit |= hit;
            match inf.req.kind {
                BusReqKind::Invalidate => info!(
                    "@ {:<6} BUS :: Cache_{} invalidated Cache_{} addr({:#x})",
                    q.now(),
                    name_of(&self.peers, inf.req.source),
                    name_of(&self.peers, responder),
                    inf.req.addr
                ),
                _ => info!(
                    "@ {:<6} BUS :: Cache_{} snooped Cache_{} addr({:#x}) --> {}",
                    q.now(),
                    name_of(&self.peers, inf.req.source),
                    name_of(&self.peers, responder),
                    inf.req.addr,
                    if hit { "SNOOP_HIT" } else { "SNOOP_MISS" }
                ),
            }
            inf.remaining -= 1;
            if inf.remaining > 0 {
                return None;
            }
        }
        self.finish(id, q)
    }

    /// Completes an in-flight request whose fan-out has finished (the final
    /// responder, a zero-target broadcast, or a data service). Reschedules
    /// `process_next` exactly once.
    pub fn finish(&mut self, id: ReqId, q: &mut EventQ<Action>) -> Option<(BusReq, bool)> {
        let inf = self.inflight.remove(&id)?;
        if matches!(
            inf.req.kind,
            BusReqKind::ReadMissService | BusReqKind::WriteMissService
        ) {
            info!(
                "@ {:<6} BUS :: Data service completed for Cache_{} addr({:#x})",
                q.now(),
                self.name_of(inf.req.source),
                inf.req.addr
            );
        }
        q.schedule(0, Action::BusProcessNext);
        Some((inf.req, inf.any_hit))
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served
    }

    fn alloc_req_id(&mut self) -> ReqId {
        let id = self.next_req;
        self.next_req += 1;
        id
    }

    fn name_of(&self, id: CacheId) -> &str {
        name_of(&self.peers, id)
    }
}

impl Default for SnoopBus {
    fn default() -> Self {
        Self::new()
    }
}

fn name_of(peers: &[(CacheId, String)], id: CacheId) -> &str {
    peers
        .iter()
        .find(|(peer, _)| *peer == id)
        .map(|(_, name)| name.as_str())
        .unwrap_or("?")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(kind: BusReqKind, source: CacheId) -> BusReq {
        BusReq {
            kind,
            source,
            addr: 0x1000,
            latency: 3,
        }
    }

    fn two_cache_bus() -> SnoopBus {
        let mut bus = SnoopBus::new();
        bus.register_cache(0, "L1A");
        bus.register_cache(1, "L1B");
        bus
    }

    #[test]
    fn requests_are_served_fifo_one_at_a_time() {
        let mut bus = two_cache_bus();
        let mut q = EventQ::new();
        bus.request_grant(req(BusReqKind::SnoopRead, 0), &mut q);
        bus.request_grant(req(BusReqKind::SnoopWrite, 1), &mut q);
        assert!(bus.is_busy());
        // only the first grant scheduled a process_next
        assert_eq!(q.pop(), Some(Action::BusProcessNext));
        assert!(q.is_empty());
        bus.process_next(&mut q);
        assert_eq!(bus.queue_len(), 1);
        // the snoop fans out to the one peer at the snoop latency
        let Some(Action::SnoopResponse { req: id, cache }) = q.pop() else {
            panic!("expected a snoop response event");
        };
        assert_eq!(q.now(), 3);
        assert_eq!(cache, 1);
        let (breq, any) = bus.note_response(id, cache, false, &mut q).unwrap();
        assert_eq!(breq.kind, BusReqKind::SnoopRead);
        assert!(!any);
        // completion rescheduled process_next for the queued SnoopWrite
        assert_eq!(q.pop(), Some(Action::BusProcessNext));
        bus.process_next(&mut q);
        assert_eq!(bus.queue_len(), 0);
        assert!(bus.is_busy());
    }

    #[test]
    fn zero_target_broadcast_completes_with_miss() {
        let mut bus = SnoopBus::new();
        bus.register_cache(0, "L1A");
        let mut q = EventQ::new();
        bus.request_grant(req(BusReqKind::SnoopRead, 0), &mut q);
        assert_eq!(q.pop(), Some(Action::BusProcessNext));
        bus.process_next(&mut q);
        let Some(Action::BroadcastDone { req: id }) = q.pop() else {
            panic!("expected a broadcast completion event");
        };
        assert_eq!(q.now(), 3);
        let (_, any) = bus.finish(id, &mut q).unwrap();
        assert!(!any);
        bus.process_next(&mut q);
        assert!(!bus.is_busy());
    }

    #[test]
    fn snoop_responses_are_or_aggregated() {
        let mut bus = two_cache_bus();
        bus.register_cache(2, "L1C");
        let mut q = EventQ::new();
        bus.request_grant(req(BusReqKind::SnoopWrite, 0), &mut q);
        q.pop();
        bus.process_next(&mut q);
        let Some(Action::SnoopResponse { req: id, cache: first }) = q.pop() else {
            panic!("expected a snoop response event");
        };
        // responders fan out in registration order
        assert_eq!(first, 1);
        assert!(bus.note_response(id, first, true, &mut q).is_none());
        let Some(Action::SnoopResponse { cache: second, .. }) = q.pop() else {
            panic!("expected a snoop response event");
        };
        assert_eq!(second, 2);
        let (_, any) = bus.note_response(id, second, false, &mut q).unwrap();
        assert!(any);
    }

    #[test]
    fn invalidate_completes_true_regardless_of_responses() {
        let mut bus = two_cache_bus();
        let mut q = EventQ::new();
        bus.request_grant(req(BusReqKind::Invalidate, 0), &mut q);
        q.pop();
        bus.process_next(&mut q);
        let Some(Action::SnoopResponse { req: id, cache }) = q.pop() else {
            panic!("expected a snoop response event");
        };
        let (_, any) = bus.note_response(id, cache, false, &mut q).unwrap();
        assert!(any);
    }

    #[test]
    fn data_service_completes_after_its_latency() {
        let mut bus = two_cache_bus();
        let mut q = EventQ::new();
        bus.request_grant(
            BusReq {
                kind: BusReqKind::ReadMissService,
                source: 0,
                addr: 0x40,
                latency: 15,
            },
            &mut q,
        );
        q.pop();
        bus.process_next(&mut q);
        let Some(Action::BroadcastDone { req: id }) = q.pop() else {
            panic!("expected a service completion event");
        };
        assert_eq!(q.now(), 15);
        let (breq, any) = bus.finish(id, &mut q).unwrap();
        assert_eq!(breq.kind, BusReqKind::ReadMissService);
        assert!(any);
        assert_eq!(bus.requests_served(), 1);
    }
}
