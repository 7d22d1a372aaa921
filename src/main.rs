use std::path::PathBuf;
use std::process;

use clap::Parser;
use env_logger::Env;
use log::error;

use cachesim_ev::commons::CacheParams;
use cachesim_ev::sim::MesiLruSim;
use cachesim_ev::utils::read_tracefile;

#[derive(Parser)]
#[command(
    name = "cachesim-ev",
    about = "Event-driven snoopy-bus MESI cache coherence simulator"
)]
struct Args {
    /// Trace file, one `<issue_time> <cache_idx> <R|W> <addr>` tuple per line
    trace: PathBuf,

    /// Number of caches sharing the bus
    #[arg(long, default_value_t = 2)]
    caches: usize,

    /// Block size in bytes (power of two)
    #[arg(long, default_value_t = 64)]
    block_size: u64,

    /// Number of sets (power of two)
    #[arg(long, default_value_t = 16)]
    num_sets: u64,

    /// Ways per set
    #[arg(long, default_value_t = 4)]
    assoc: usize,

    /// Main memory size in bytes (power of two)
    #[arg(long, default_value_t = 65536)]
    mm_size: u64,

    /// Read hit latency in ticks
    #[arg(long, default_value_t = 5)]
    rd_hit_lt: u64,

    /// Read miss service latency in ticks (data from memory)
    #[arg(long, default_value_t = 15)]
    rd_miss_lt: u64,

    /// Write hit latency in ticks
    #[arg(long, default_value_t = 5)]
    wr_hit_lt: u64,

    /// Write miss service latency in ticks (data from memory)
    #[arg(long, default_value_t = 15)]
    wr_miss_lt: u64,

    /// Snoop broadcast latency in ticks
    #[arg(long, default_value_t = 3)]
    snoop_lt: u64,

    /// Miss service latency in ticks when a peer cache sources the data
    #[arg(long, default_value_t = 8)]
    snoop_hit_lt: u64,

    /// Outstanding misses per cache
    #[arg(long, default_value_t = 16)]
    mshr_capacity: usize,
}

fn cache_name(i: usize) -> String {
    if i < 26 {
        format!("L1{}", (b'A' + i as u8) as char)
    } else {
        format!("L1_{i}")
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let trace = read_tracefile(&args.trace)?;
    for entry in &trace {
        if entry.cache >= args.caches {
            return Err(format!(
                "trace refers to cache {} but only {} caches are configured",
                entry.cache, args.caches
            )
            .into());
        }
    }

    let params = CacheParams {
        block_size: args.block_size,
        num_sets: args.num_sets,
        assoc: args.assoc,
        mm_size: args.mm_size,
        rd_hit_lt: args.rd_hit_lt,
        rd_miss_lt: args.rd_miss_lt,
        wr_hit_lt: args.wr_hit_lt,
        wr_miss_lt: args.wr_miss_lt,
        snoop_lt: args.snoop_lt,
        snoop_hit_lt: args.snoop_hit_lt,
        mshr_capacity: args.mshr_capacity,
    };

    let mut sim = MesiLruSim::new();
    for i in 0..args.caches {
        sim.add_cache(&cache_name(i), params.clone())?;
    }
    sim.schedule_trace(&trace);
    sim.run()?;

    println!("finished simulation at t={}", sim.now());
    println!(
        "{:<8} {:>8} {:>8} {:>8} {:>8} {:>10} {:>8} {:>8} {:>8} {:>10}",
        "cache", "rd_hit", "rd_miss", "wr_hit", "wr_miss", "coalesced", "stalls", "snoops",
        "invals", "evictions"
    );
    for cache in sim.caches() {
        let s = cache.stats();
        println!(
            "{:<8} {:>8} {:>8} {:>8} {:>8} {:>10} {:>8} {:>8} {:>8} {:>10}",
            cache.name(),
            s.read_hits,
            s.read_misses,
            s.write_hits,
            s.write_misses,
            s.coalesced_misses,
            s.mshr_stalls,
            s.snoops_received,
            s.invalidations_received,
            s.evictions
        );
    }
    println!("bus requests served: {}", sim.bus().requests_served());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{e}");
        process::exit(1);
    }
}
