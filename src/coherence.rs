// coherence policies, pluggable per cache

use std::fmt;

/// Per-line coherence state machine. The controller consults `can_read` /
/// `can_write` to classify an access and applies the transition hooks on
/// local and snooped events.
pub trait CoherencePolicy: Default {
    type State: Copy + Eq + fmt::Debug + fmt::Display;

    fn default_state(&self) -> Self::State;

    fn can_read(&self, state: Self::State) -> bool;
    fn can_write(&self, state: Self::State) -> bool;

    /// A local read miss resolved; `snoop_hit` tells whether any peer held
    /// the block when the miss was snooped.
    fn on_read_miss(&self, state: &mut Self::State, snoop_hit: bool);
    fn on_write(&self, state: &mut Self::State);
    fn on_snoop_read(&self, state: &mut Self::State);
    fn on_snoop_write(&self, state: &mut Self::State);

    /// Whether replacing a line in this state logically requires a write-back.
    fn is_dirty(&self, state: Self::State) -> bool;
}

// MESI (Illinois), write-invalidate

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MesiState {
    I,
    S,
    E,
    M,
}

impl fmt::Display for MesiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MesiState::I => "I",
            MesiState::S => "S",
            MesiState::E => "E",
            MesiState::M => "M",
        };
        f.write_str(s)
    }
}

#[derive(Default)]
pub struct Mesi;

impl CoherencePolicy for Mesi {
    type State = MesiState;

    fn default_state(&self) -> MesiState {
        MesiState::I
    }

    fn can_read(&self, state: MesiState) -> bool {
        state != MesiState::I
    }

    fn can_write(&self, state: MesiState) -> bool {
        // S needs an invalidation round first; I is handled as a miss before
        // this check is reached
        state != MesiState::S && state != MesiState::I
    }

    fn on_read_miss(&self, state: &mut MesiState, snoop_hit: bool) {
        *state = if snoop_hit {
            MesiState::S
        } else {
            MesiState::E
        };
    }

    fn on_write(&self, state: &mut MesiState) {
        *state = MesiState::M;
    }

    fn on_snoop_read(&self, state: &mut MesiState) {
        if *state == MesiState::M || *state == MesiState::E {
            *state = MesiState::S;
        }
    }

    fn on_snoop_write(&self, state: &mut MesiState) {
        *state = MesiState::I;
    }

    fn is_dirty(&self, state: MesiState) -> bool {
        state == MesiState::M
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MesiState::*;

    #[test]
    fn read_miss_resolves_to_shared_or_exclusive() {
        let mesi = Mesi;
        let mut s = I;
        mesi.on_read_miss(&mut s, true);
        assert_eq!(s, S);
        let mut s = I;
        mesi.on_read_miss(&mut s, false);
        assert_eq!(s, E);
    }

    #[test]
    fn local_write_always_modifies() {
        let mesi = Mesi;
        for start in [I, S, E, M] {
            let mut s = start;
            mesi.on_write(&mut s);
            assert_eq!(s, M);
        }
    }

    #[test]
    fn foreign_read_demotes_owners_to_shared() {
        let mesi = Mesi;
        for (start, want) in [(M, S), (E, S), (S, S), (I, I)] {
            let mut s = start;
            mesi.on_snoop_read(&mut s);
            assert_eq!(s, want);
        }
    }

    #[test]
    fn foreign_write_invalidates() {
        let mesi = Mesi;
        for start in [S, E, M] {
            let mut s = start;
            mesi.on_snoop_write(&mut s);
            assert_eq!(s, I);
        }
    }

    #[test]
    fn permissions() {
        let mesi = Mesi;
        assert!(!mesi.can_read(I));
        assert!(mesi.can_read(S));
        assert!(!mesi.can_write(S));
        assert!(mesi.can_write(E));
        assert!(mesi.can_write(M));
        assert!(mesi.is_dirty(M));
        assert!(!mesi.is_dirty(E));
    }
}
