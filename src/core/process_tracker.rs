//! C3 — periodically snapshots the local port→PID→process-name mapping.
//!
//! Rebuilds `port -> PID` from scratch every cycle (default 2s) so stale
//! bindings never linger; the PID-name cache persists across refreshes to
//! amortize process-name resolution (§4.3).

use std::collections::HashMap;
use std::sync::RwLock;

/// Single RW-locked struct: writers are rare (once per refresh cycle),
/// readers frequent (once per packet), matching §4.3's single-lock policy.
pub struct ProcessTracker {
    inner: RwLock<Inner>,
}

struct Inner {
    port_to_pid: HashMap<u16, i32>,
    pid_to_name: HashMap<i32, String>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                port_to_pid: HashMap::new(),
                pid_to_name: HashMap::new(),
            }),
        }
    }

    /// Returns "" if either the port→PID or PID→name mapping is absent.
    pub fn name_for_local_port(&self, port: u16) -> String {
        let inner = self.inner.read().expect("process tracker lock poisoned");
        inner
            .port_to_pid
            .get(&port)
            .and_then(|pid| inner.pid_to_name.get(pid))
            .cloned()
            .unwrap_or_default()
    }

    /// Rebuild the port→PID map from `/proc/net/{tcp,tcp6,udp,udp6}`; for any
    /// newly-seen PID, resolve and cache its process name.
    pub fn refresh(&self) {
        let port_to_pid = scan_port_table();

        let new_pids: Vec<i32> = {
            let inner = self.inner.read().expect("process tracker lock poisoned");
            port_to_pid
                .values()
                .filter(|pid| !inner.pid_to_name.contains_key(pid))
                .copied()
                .collect()
        };

        let resolved: Vec<(i32, String)> = new_pids
            .into_iter()
            .filter_map(|pid| process_name(pid).map(|name| (pid, name)))
            .collect();

        let mut inner = self.inner.write().expect("process tracker lock poisoned");
        inner.port_to_pid = port_to_pid;
        for (pid, name) in resolved {
            inner.pid_to_name.entry(pid).or_insert(name);
        }
    }
}

impl Default for ProcessTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Scan the kernel's IPv4/IPv6 TCP/UDP socket tables for local ports bound to
/// a PID, by cross-referencing each process's open FDs against inode numbers
/// in `/proc/net/*`.
fn scan_port_table() -> HashMap<u16, i32> {
    let mut inode_to_port: HashMap<u64, u16> = HashMap::new();

    if let Ok(entries) = procfs::net::tcp() {
        for e in entries {
            inode_to_port.insert(e.inode, e.local_address.port());
        }
    }
    if let Ok(entries) = procfs::net::tcp6() {
        for e in entries {
            inode_to_port.insert(e.inode, e.local_address.port());
        }
    }
    if let Ok(entries) = procfs::net::udp() {
        for e in entries {
            inode_to_port.insert(e.inode, e.local_address.port());
        }
    }
    if let Ok(entries) = procfs::net::udp6() {
        for e in entries {
            inode_to_port.insert(e.inode, e.local_address.port());
        }
    }

    let mut port_to_pid = HashMap::new();
    let Ok(procs) = procfs::process::all_processes() else {
        return port_to_pid;
    };

    for proc_result in procs {
        let Ok(proc) = proc_result else { continue };
        let pid = proc.pid;
        let Ok(fds) = proc.fd() else { continue };
        for fd_result in fds {
            let Ok(fd) = fd_result else { continue };
            if let procfs::process::FDTarget::Socket(inode) = fd.target {
                if let Some(&port) = inode_to_port.get(&inode) {
                    port_to_pid.insert(port, pid);
                }
            }
        }
    }

    port_to_pid
}

fn process_name(pid: i32) -> Option<String> {
    procfs::process::Process::new(pid)
        .ok()?
        .stat()
        .ok()
        .map(|s| s.comm)
}
