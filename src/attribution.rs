//! Best-effort attribution of local DNS clients to processes.
//!
//! Looks up the peer's socket inode in `/proc/net/udp` (or `udp6`), then
//! walks `/proc/<pid>/fd/*` for a link to `socket:[<inode>]` and reads
//! that process's `cmdline`. The two scans are not atomic: the client may
//! close its socket in between, in which case nothing is found.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// Default procfs mount point.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Maps UDP peers to `<program>/<pid>` labels.
#[derive(Debug, Clone)]
pub struct ProcessAttributor {
    proc_root: PathBuf,
}

impl ProcessAttributor {
    /// Reads the real `/proc`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root(DEFAULT_PROC_ROOT)
    }

    /// Reads a procfs tree mounted elsewhere (useful for testing).
    #[must_use]
    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    /// Returns the label of the process owning `peer`, if one is found.
    ///
    /// Never fails: every I/O error is logged and treated as "unknown".
    #[must_use]
    pub fn attribute(&self, peer: SocketAddr) -> Option<String> {
        let inode = self.find_inode(peer)?;
        let pid = self.find_owner(inode)?;
        Some(self.process_name(pid))
    }

    /// Finds the inode of the local UDP socket bound to `addr`.
    #[must_use]
    pub fn find_inode(&self, addr: SocketAddr) -> Option<u64> {
        let table = if addr.is_ipv4() { "udp" } else { "udp6" };
        let path = self.proc_root.join("net").join(table);

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read socket table");
                return None;
            }
        };

        content
            .lines()
            .skip(1)
            .filter_map(|line| {
                let entry = parse_socket_line(line);
                if entry.is_none() {
                    tracing::debug!(path = %path.display(), line, "unexpected socket table line");
                }
                entry
            })
            .find(|(local, _)| *local == addr)
            .map(|(_, inode)| inode)
    }

    /// Finds a process (other than init) holding a descriptor for `inode`.
    fn find_owner(&self, inode: u64) -> Option<u32> {
        let entries = match std::fs::read_dir(&self.proc_root) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(path = %self.proc_root.display(), error = %e, "failed to list processes");
                return None;
            }
        };

        let target = format!("socket:[{inode}]");
        entries
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse::<u32>().ok())
            .filter(|&pid| pid != 1)
            .find(|&pid| self.has_socket(pid, &target))
    }

    fn has_socket(&self, pid: u32, target: &str) -> bool {
        let fd_dir = self.pid_dir(pid).join("fd");
        let fds = match std::fs::read_dir(&fd_dir) {
            Ok(fds) => fds,
            Err(e) => {
                log_scan_error(&fd_dir, &e);
                return false;
            }
        };

        fds.filter_map(Result::ok).any(|fd| {
            std::fs::read_link(fd.path()).is_ok_and(|link| link.as_os_str() == target)
        })
    }

    /// Formats `<basename of argv[0]>/<pid>`.
    #[must_use]
    pub fn process_name(&self, pid: u32) -> String {
        let path = self.pid_dir(pid).join("cmdline");
        let cmdline = match std::fs::read(&path) {
            Ok(c) => c,
            Err(e) => {
                log_scan_error(&path, &e);
                return format!("<unknown>/{pid}");
            }
        };

        let Some(nul) = cmdline.iter().position(|&b| b == 0) else {
            return format!("<unknown>/{pid}");
        };
        let prog = String::from_utf8_lossy(&cmdline[..nul]);
        let base = prog.rsplit('/').next().unwrap_or(&prog);
        format!("{base}/{pid}")
    }

    fn pid_dir(&self, pid: u32) -> PathBuf {
        self.proc_root.join(pid.to_string())
    }
}

impl Default for ProcessAttributor {
    fn default() -> Self {
        Self::new()
    }
}

fn log_scan_error(path: &Path, e: &io::Error) {
    // Processes come and go mid-scan, and other users' fds are unreadable.
    if matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    ) {
        tracing::trace!(path = %path.display(), error = %e, "skipping process");
    } else {
        tracing::debug!(path = %path.display(), error = %e, "failed to scan process");
    }
}

/// Parses a `/proc/net/udp{,6}` row into its local address and inode.
///
/// ```text
///  9777: 0100007F:0035 00000000:0000 07 00000000:00000000 00:00000000 00000000     0        0 2969713 2 ffff9ce6fd1cb180 0
/// ```
fn parse_socket_line(line: &str) -> Option<(SocketAddr, u64)> {
    let cols: Vec<&str> = line.split_whitespace().collect();
    let (ip_hex, port_hex) = cols.get(1)?.split_once(':')?;
    let ip = parse_hex_ip(ip_hex)?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    let inode = cols.get(9)?.parse().ok()?;
    Some((SocketAddr::new(ip, port), inode))
}

/// Addresses are printed as native-endian 32-bit words in hex.
fn parse_hex_ip(hex: &str) -> Option<IpAddr> {
    match hex.len() {
        8 => {
            let word = u32::from_str_radix(hex, 16).ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes())))
        }
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
                let word = u32::from_str_radix(hex.get(i * 8..i * 8 + 8)?, 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use super::*;

    const UDP_HEADER: &str = "   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode ref pointer drops";

    fn udp_line(slot: u32, local: &str, inode: u64) -> String {
        format!(
            " {slot}: {local} 00000000:0000 07 00000000:00000000 00:00000000 00000000  1000        0 {inode} 2 0000000000000000 0"
        )
    }

    /// Builds a fake procfs with one process owning the given socket inode.
    fn fake_proc(owner_pid: u32, inode: u64, cmdline: &[u8]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        std::fs::create_dir_all(root.join("net")).unwrap();
        let local = format!(
            "{:08X}:{:04X}",
            u32::from_ne_bytes([127, 0, 0, 1]),
            40000u16
        );
        let table = format!(
            "{UDP_HEADER}\n{}\n{}\n",
            udp_line(0, "0100007F:0035", 1111),
            udp_line(1, &local, inode)
        );
        std::fs::write(root.join("net/udp"), table).unwrap();

        std::fs::create_dir_all(root.join("self")).unwrap();

        let pid_dir = root.join(owner_pid.to_string());
        std::fs::create_dir_all(pid_dir.join("fd")).unwrap();
        symlink("/dev/null", pid_dir.join("fd/0")).unwrap();
        symlink(format!("socket:[{inode}]"), pid_dir.join("fd/3")).unwrap();
        std::fs::write(pid_dir.join("cmdline"), cmdline).unwrap();

        let other = root.join("99");
        std::fs::create_dir_all(other.join("fd")).unwrap();
        symlink("socket:[1111]", other.join("fd/5")).unwrap();
        std::fs::write(other.join("cmdline"), b"/usr/sbin/other\0").unwrap();

        dir
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn parses_ipv4_row() {
        let (addr, inode) = parse_socket_line(&udp_line(
            3,
            &format!("{:08X}:0035", u32::from_ne_bytes([127, 0, 0, 1])),
            2_969_713,
        ))
        .unwrap();

        assert_eq!(addr, "127.0.0.1:53".parse::<SocketAddr>().unwrap());
        assert_eq!(inode, 2_969_713);
    }

    #[test]
    fn parses_ipv6_loopback() {
        let words: String = [0u32, 0, 0, u32::from_ne_bytes([0, 0, 0, 1])]
            .iter()
            .map(|w| format!("{w:08X}"))
            .collect();

        assert_eq!(parse_hex_ip(&words), Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }

    #[test]
    fn rejects_malformed_rows() {
        assert!(parse_socket_line("").is_none());
        assert!(parse_socket_line(UDP_HEADER).is_none());
        assert!(parse_socket_line(" 1: 0100007F 00000000:0000 07").is_none());
        assert!(parse_socket_line(" 1: 0100007F:0035 00000000:0000 07 x x x x x notanumber").is_none());
    }

    #[test]
    fn attributes_owning_process() {
        let proc = fake_proc(1234, 424_242, b"/usr/bin/dig\0+short\0example.com\0");
        let attributor = ProcessAttributor::with_root(proc.path());

        assert_eq!(attributor.find_inode(peer()), Some(424_242));
        assert_eq!(attributor.attribute(peer()).as_deref(), Some("dig/1234"));
    }

    #[test]
    fn init_is_never_reported() {
        let proc = fake_proc(1, 424_242, b"/sbin/init\0");
        let attributor = ProcessAttributor::with_root(proc.path());

        assert_eq!(attributor.attribute(peer()), None);
    }

    #[test]
    fn unknown_peer_is_unattributed() {
        let proc = fake_proc(1234, 424_242, b"/usr/bin/dig\0");
        let attributor = ProcessAttributor::with_root(proc.path());

        assert_eq!(attributor.attribute("127.0.0.1:40001".parse().unwrap()), None);
        assert_eq!(attributor.attribute("[::1]:40000".parse().unwrap()), None);
    }

    #[test]
    fn closed_socket_is_unattributed() {
        let proc = fake_proc(1234, 424_242, b"/usr/bin/dig\0");
        std::fs::remove_file(proc.path().join("1234/fd/3")).unwrap();

        let attributor = ProcessAttributor::with_root(proc.path());
        assert_eq!(attributor.attribute(peer()), None);
    }

    #[test]
    fn unreadable_cmdline_still_reports_pid() {
        let proc = fake_proc(1234, 424_242, b"no-terminator");
        let attributor = ProcessAttributor::with_root(proc.path());
        assert_eq!(attributor.attribute(peer()).as_deref(), Some("<unknown>/1234"));

        std::fs::remove_file(proc.path().join("1234/cmdline")).unwrap();
        assert_eq!(attributor.process_name(1234), "<unknown>/1234");
    }

    #[test]
    fn missing_proc_is_unattributed() {
        let attributor = ProcessAttributor::with_root("/nonexistent/proc");
        assert_eq!(attributor.attribute(peer()), None);
    }

    #[test]
    fn attributes_own_socket_on_real_proc() {
        if !Path::new("/proc/net/udp").exists() || std::process::id() == 1 {
            return;
        }
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let label = ProcessAttributor::new()
            .attribute(socket.local_addr().unwrap())
            .unwrap();

        assert!(label.ends_with(&format!("/{}", std::process::id())), "{label}");
    }
}
