use thiserror::Error;

/// Construction-time configuration errors. All of these are fatal before the
/// simulation starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a power of two, got {value}")]
    NotPowerOfTwo { name: &'static str, value: u64 },

    #[error("associativity must be at least 1")]
    ZeroAssoc,

    #[error("MSHR capacity must be at least 1")]
    ZeroMshrCapacity,

    #[error(
        "main memory of {mm_size:#x} bytes is too small for {num_sets} sets of {block_size}-byte blocks"
    )]
    AddressSpaceTooSmall {
        mm_size: u64,
        num_sets: u64,
        block_size: u64,
    },
}

/// Runtime simulation errors. These abort the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache_{cache}: addr({addr:#x}) outside main memory of {mm_size:#x} bytes")]
    AddressOutOfRange {
        cache: String,
        addr: u64,
        mm_size: u64,
    },

    #[error("no cache with id {id} is attached to the bus")]
    UnknownCache { id: usize },
}

/// Trace file reader errors.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("failed to read trace file: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace line {line}: {msg}")]
    Malformed { line: usize, msg: String },
}
