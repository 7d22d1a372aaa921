use std::fs;
use std::path::Path;

use crate::commons::{Op, TraceEntry};
use crate::error::TraceError;

/// Reads an access trace: one `<issue_time> <cache_idx> <R|W> <addr>` tuple
/// per line, whitespace-separated. Blank lines and `#` comments are skipped;
/// addresses may carry a `0x` prefix.
pub fn read_tracefile(path: &Path) -> Result<Vec<TraceEntry>, TraceError> {
    let text = fs::read_to_string(path)?;
    let mut trace = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let mut field = |name: &str| {
            parts.next().ok_or_else(|| TraceError::Malformed {
                line,
                msg: format!("missing {name}"),
            })
        };
        let at = field("issue time")?;
        let cache = field("cache index")?;
        let op = field("operation")?;
        let addr = field("address")?;

        let at = at.parse::<u64>().map_err(|_| TraceError::Malformed {
            line,
            msg: format!("invalid issue time {at:?}"),
        })?;
        let cache = cache.parse::<usize>().map_err(|_| TraceError::Malformed {
            line,
            msg: format!("invalid cache index {cache:?}"),
        })?;
        let op = match op {
            "R" | "r" | "0" => Op::Read,
            "W" | "w" | "1" => Op::Write,
            other => {
                return Err(TraceError::Malformed {
                    line,
                    msg: format!("invalid operation {other:?}, expected R or W"),
                })
            }
        };
        let addr = u64::from_str_radix(addr.trim_start_matches("0x"), 16).map_err(|_| {
            TraceError::Malformed {
                line,
                msg: format!("invalid address {addr:?}"),
            }
        })?;
        trace.push(TraceEntry {
            at,
            cache,
            op,
            addr,
        });
    }
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_trace(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_times_ops_and_hex_addresses() {
        let file = write_trace(
            "# two caches hammering one block\n\
             0 0 R 0x1000\n\
             \n\
             10 1 W 1000\n\
             20 0 1 0x40\n",
        );
        let trace = read_tracefile(file.path()).unwrap();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace[0].at, 0);
        assert_eq!(trace[0].op, Op::Read);
        assert_eq!(trace[0].addr, 0x1000);
        assert_eq!(trace[1].cache, 1);
        assert_eq!(trace[1].op, Op::Write);
        assert_eq!(trace[1].addr, 0x1000);
        assert_eq!(trace[2].op, Op::Write);
    }

    #[test]
    fn reports_the_offending_line() {
        let file = write_trace("0 0 R 0x1000\n5 0 X 0x1000\n");
        let err = read_tracefile(file.path()).unwrap_err();
        assert!(matches!(err, TraceError::Malformed { line: 2, .. }));
    }

    #[test]
    fn reports_missing_fields() {
        let file = write_trace("0 0 R\n");
        let err = read_tracefile(file.path()).unwrap_err();
        assert!(matches!(err, TraceError::Malformed { line: 1, .. }));
    }
}
