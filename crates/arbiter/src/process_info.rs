//! Process priority oracle.
//!
//! The arbiter treats priority as a pure query: lower value means higher
//! scheduling importance. Lookups may fail transiently; the engine skips
//! candidates it cannot rate and refuses requests whose caller it cannot
//! rate.

use std::fs;

/// Supplies the current scheduling priority of a process.
pub trait ProcessInfo: Send + Sync {
    /// Current priority of `pid`, or None if it cannot be read right now.
    fn priority(&self, pid: u32) -> Option<i32>;
}

/// Oracle backed by `/proc/<pid>/stat`.
pub struct ProcProcessInfo;

impl ProcessInfo for ProcProcessInfo {
    fn priority(&self, pid: u32) -> Option<i32> {
        let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        parse_stat_priority(&stat)
    }
}

/// Field 18 of the stat line. The comm field may contain spaces and
/// parentheses, so counting starts after the last ')'.
fn parse_stat_priority(stat: &str) -> Option<i32> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.split_whitespace().nth(15)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_priority() {
        let stat = "1234 (arbiter) S 1 1234 1234 0 -1 4194560 500 0 0 0 2 1 0 0 20 0 1 0 12345 1000000 200 18446744073709551615";
        assert_eq!(parse_stat_priority(stat), Some(20));
    }

    #[test]
    fn test_parse_stat_priority_with_spaces_in_comm() {
        let stat = "77 (tmux: server (1)) R 1 77 77 0 -1 4194560 500 0 0 0 2 1 0 0 -11 0 1 0 12345 1000000 200 18446744073709551615";
        assert_eq!(parse_stat_priority(stat), Some(-11));
    }

    #[test]
    fn test_parse_rejects_truncated_line() {
        assert_eq!(parse_stat_priority("1234 (arbiter) S 1"), None);
        assert_eq!(parse_stat_priority(""), None);
    }

    #[test]
    fn test_proc_oracle_reads_own_priority() {
        let oracle = ProcProcessInfo;
        assert!(oracle.priority(std::process::id()).is_some());
    }

    #[test]
    fn test_proc_oracle_fails_for_missing_pid() {
        let oracle = ProcProcessInfo;
        // Pids above the default pid_max are never allocated.
        assert_eq!(oracle.priority(u32::MAX), None);
    }
}
