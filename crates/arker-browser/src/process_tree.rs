//! OS-level process-tree sweep for browser-bundle cleanup (spec §4.3 step 5):
//! library-level shutdown only sends CDP IPC, so survivors are poll-waited
//! and finally SIGKILLed.

use std::collections::HashSet;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const SOFT_KILL_AT: Duration = Duration::from_secs(10);
const GIVE_UP_AT: Duration = Duration::from_secs(20);

/// Returns `root` plus every descendant PID, discovered by walking
/// `/proc/*/stat` for parent links. Linux-only; the binary name filter
/// matches the browser process and anything spawned under it.
pub fn descendants_of(root: u32, binary_name_hint: &str) -> Vec<u32> {
    let mut parent_of: Vec<(u32, u32, String)> = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return vec![root];
    };
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let stat_path = entry.path().join("stat");
        let Ok(contents) = std::fs::read_to_string(&stat_path) else {
            continue;
        };
        if let Some((ppid, comm)) = parse_stat(&contents) {
            parent_of.push((pid, ppid, comm));
        }
    }

    let mut tree = HashSet::new();
    tree.insert(root);
    // Fixed-point: repeatedly add any process whose parent is already in
    // the tree, until nothing new is found.
    loop {
        let mut added = false;
        for (pid, ppid, comm) in &parent_of {
            if tree.contains(ppid) && !tree.contains(pid) {
                if comm.contains(binary_name_hint) || *ppid == root {
                    tree.insert(*pid);
                    added = true;
                }
            }
        }
        if !added {
            break;
        }
    }
    tree.into_iter().collect()
}

fn parse_stat(contents: &str) -> Option<(u32, String)> {
    let open = contents.find('(')?;
    let close = contents.rfind(')')?;
    let comm = contents.get(open + 1..close)?.to_string();
    let rest = contents.get(close + 2..)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // state is fields[0], ppid is fields[1]
    let ppid = fields.get(1)?.parse::<u32>().ok()?;
    Some((ppid, comm))
}

fn is_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Poll-waits `pids` to exit; escalates to SIGKILL at 10s; gives up
/// (logging survivors) at 20s total.
pub async fn sweep(pids: &[u32]) {
    let mut remaining: HashSet<u32> = pids.iter().copied().filter(|p| is_alive(*p)).collect();
    if remaining.is_empty() {
        return;
    }

    let started = tokio::time::Instant::now();
    let mut sent_kill = false;

    loop {
        remaining.retain(|pid| is_alive(*pid));
        if remaining.is_empty() {
            return;
        }

        let elapsed = started.elapsed();
        if elapsed >= GIVE_UP_AT {
            warn!(survivors = ?remaining, "browser process-tree sweep gave up, leaking processes");
            return;
        }
        if elapsed >= SOFT_KILL_AT && !sent_kill {
            for pid in &remaining {
                let _ = kill(Pid::from_raw(*pid as i32), Signal::SIGKILL);
            }
            sent_kill = true;
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comm_and_ppid_from_stat_line() {
        let line = "1234 (chrome helper) S 1 1234 1234 0 -1 4194304 100 0 0 0 0 0 0 0 20 0 1 0";
        let (ppid, comm) = parse_stat(line).unwrap();
        assert_eq!(ppid, 1);
        assert_eq!(comm, "chrome helper");
    }

    #[tokio::test]
    async fn sweep_returns_immediately_for_empty_input() {
        sweep(&[]).await;
    }
}
