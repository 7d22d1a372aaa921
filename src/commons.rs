use crate::error::ConfigError;

// caches are identified by their registration index on the bus
pub type CacheId = usize;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Op {
    Read,
    Write,
}

/// One access from the input trace: at virtual time `at`, cache `cache`
/// performs `op` on `addr`.
#[derive(Clone, Copy, Debug)]
pub struct TraceEntry {
    pub at: u64,
    pub cache: CacheId,
    pub op: Op,
    pub addr: u64,
}

// per-cache configuration

#[derive(Clone, Debug)]
pub struct CacheParams {
    pub block_size: u64,
    pub num_sets: u64,
    pub assoc: usize,
    pub mm_size: u64,
    pub rd_hit_lt: u64,
    pub rd_miss_lt: u64,
    pub wr_hit_lt: u64,
    pub wr_miss_lt: u64,
    pub snoop_lt: u64,
    pub snoop_hit_lt: u64,
    pub mshr_capacity: usize,
}

impl Default for CacheParams {
    fn default() -> Self {
        CacheParams {
            block_size: 64,     // bytes
            num_sets: 16,       // sets
            assoc: 4,           // ways
            mm_size: 65536,     // bytes
            rd_hit_lt: 5,       // ticks
            rd_miss_lt: 15,     // ticks, data sourced from memory
            wr_hit_lt: 5,       // ticks
            wr_miss_lt: 15,     // ticks, data sourced from memory
            snoop_lt: 3,        // ticks, broadcast to peers
            snoop_hit_lt: 8,    // ticks, data sourced from a peer cache
            mshr_capacity: 16,  // outstanding misses
        }
    }
}

/// Address bit widths derived once from the cache geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddrLayout {
    pub blk_offset: u32,
    pub set_bits: u32,
    pub tag_bits: u32,
}

impl AddrLayout {
    /// Splits an address into (set index, tag).
    pub fn decode(&self, addr: u64) -> (usize, u64) {
        let set_idx = (addr >> self.blk_offset) & ((1 << self.set_bits) - 1);
        let tag = (addr >> (self.blk_offset + self.set_bits)) & ((1 << self.tag_bits) - 1);
        (set_idx as usize, tag)
    }
}

impl CacheParams {
    /// Validates the geometry and derives the address bit widths.
    pub fn layout(&self) -> Result<AddrLayout, ConfigError> {
        let blk_offset = log2_pow2("block_size", self.block_size)?;
        let set_bits = log2_pow2("num_sets", self.num_sets)?;
        let mm_bits = log2_pow2("mm_size", self.mm_size)?;
        if self.assoc == 0 {
            return Err(ConfigError::ZeroAssoc);
        }
        if self.mshr_capacity == 0 {
            return Err(ConfigError::ZeroMshrCapacity);
        }
        let tag_bits = mm_bits
            .checked_sub(blk_offset + set_bits)
            .ok_or(ConfigError::AddressSpaceTooSmall {
                mm_size: self.mm_size,
                num_sets: self.num_sets,
                block_size: self.block_size,
            })?;
        Ok(AddrLayout {
            blk_offset,
            set_bits,
            tag_bits,
        })
    }
}

fn log2_pow2(name: &'static str, value: u64) -> Result<u32, ConfigError> {
    if value == 0 || !value.is_power_of_two() {
        return Err(ConfigError::NotPowerOfTwo { name, value });
    }
    Ok(value.trailing_zeros())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_of_default_params() {
        let layout = CacheParams::default().layout().unwrap();
        assert_eq!(layout.blk_offset, 6);
        assert_eq!(layout.set_bits, 4);
        assert_eq!(layout.tag_bits, 6);
    }

    #[test]
    fn decode_splits_offset_set_and_tag() {
        let layout = CacheParams::default().layout().unwrap();
        // tag 4, set 3, offset 17
        let addr = (4u64 << 10) | (3 << 6) | 17;
        assert_eq!(layout.decode(addr), (3, 4));
    }

    #[test]
    fn rejects_non_power_of_two_sizes() {
        let params = CacheParams {
            block_size: 48,
            ..CacheParams::default()
        };
        assert_eq!(
            params.layout(),
            Err(ConfigError::NotPowerOfTwo {
                name: "block_size",
                value: 48
            })
        );
    }

    #[test]
    fn rejects_address_space_smaller_than_geometry() {
        let params = CacheParams {
            block_size: 64,
            num_sets: 64,
            mm_size: 1024,
            ..CacheParams::default()
        };
        assert!(matches!(
            params.layout(),
            Err(ConfigError::AddressSpaceTooSmall { .. })
        ));
    }

    #[test]
    fn rejects_zero_assoc() {
        let params = CacheParams {
            assoc: 0,
            ..CacheParams::default()
        };
        assert_eq!(params.layout(), Err(ConfigError::ZeroAssoc));
    }
}
