//! Splicing the system resolver file.
//!
//! While running, the resolver file is rewritten to point at our listener.
//! The rewritten file keeps every original line behind a sentinel prefix,
//! so the original can be recovered from disk even if we never get to
//! restore it ourselves:
//!
//! ```text
//! # created by dnstweak
//! nameserver 127.0.0.1
//! search lan
//! #dnstweak#nameserver 192.168.1.1
//! #dnstweak#search lan
//! ```
//!
//! Splicing an already spliced file unwraps the embedded original first,
//! so sentinel lines never nest.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::upstream::{DNS_PORT, Upstream};

/// First line of every spliced file.
pub const MARKER: &str = "# created by dnstweak";

/// Prefix of each embedded original line.
pub const SENTINEL: &str = "#dnstweak#";

/// Default system resolver file.
pub const DEFAULT_RESOLV_CONF: &str = "/etc/resolv.conf";

/// Outcome of reading the resolver file for a splice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplicePlan {
    /// Content to write back on restore, byte for byte.
    pub original: String,
    /// First nameserver of the original, on port 53.
    pub upstream: Option<Upstream>,
    /// Content to write now.
    pub content: String,
}

impl SplicePlan {
    /// Computes the spliced content for `existing` pointing at `listener`.
    #[must_use]
    pub fn new(existing: &str, listener: IpAddr) -> Self {
        let original = if is_spliced(existing) {
            embedded_original(existing)
        } else {
            existing.to_string()
        };

        let mut content = format!("{MARKER}\nnameserver {listener}\n");
        let mut upstream = None;

        for line in original.lines() {
            let directive = line.trim_start();
            if upstream.is_none() {
                upstream = nameserver_of(directive).map(Upstream::from_ip);
            }
            if directive.starts_with("search ") || directive.starts_with("search\t") {
                content.push_str(line);
                content.push('\n');
            }
        }

        for line in original.split_inclusive('\n') {
            content.push_str(SENTINEL);
            content.push_str(line);
        }

        Self {
            original,
            upstream,
            content,
        }
    }
}

/// Returns `true` if `content` was written by a splice.
#[must_use]
pub fn is_spliced(content: &str) -> bool {
    content
        .lines()
        .any(|line| line == MARKER || line.starts_with(SENTINEL))
}

/// Recovers the original file embedded in spliced `content`.
#[must_use]
pub fn embedded_original(content: &str) -> String {
    content
        .split_inclusive('\n')
        .filter_map(|line| line.strip_prefix(SENTINEL))
        .collect()
}

fn nameserver_of(directive: &str) -> Option<IpAddr> {
    let rest = directive.strip_prefix("nameserver")?;
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let addr = rest.split_whitespace().next()?;
    // Drop any IPv6 zone id, e.g. `fe80::1%eth0`.
    let addr = addr.split('%').next().unwrap_or(addr);
    addr.parse().ok()
}

/// Reads and writes one resolver file.
#[derive(Debug, Clone)]
pub struct ResolvConf {
    path: PathBuf,
}

impl ResolvConf {
    /// Targets the default `/etc/resolv.conf`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_path(DEFAULT_RESOLV_CONF)
    }

    /// Targets a custom path (useful for testing).
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the resolver file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current file and plans a splice pointing at `listener`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be read.
    pub fn prepare(&self, listener: IpAddr) -> Result<SplicePlan> {
        let existing = std::fs::read_to_string(&self.path)?;
        Ok(SplicePlan::new(&existing, listener))
    }

    /// Writes the spliced content of `plan`.
    pub fn apply(&self, plan: &SplicePlan) -> Result<()> {
        std::fs::write(&self.path, &plan.content)?;
        Ok(())
    }

    /// Writes `original` back verbatim.
    pub fn restore(&self, original: &str) -> Result<()> {
        std::fs::write(&self.path, original)?;
        Ok(())
    }

    /// Unwinds a splice left behind on disk.
    ///
    /// Returns `false` without touching the file if it is not spliced.
    pub fn recover(&self) -> Result<bool> {
        let existing = std::fs::read_to_string(&self.path)?;
        if !is_spliced(&existing) {
            return Ok(false);
        }
        self.restore(&embedded_original(&existing))?;
        tracing::info!(path = %self.path.display(), "restored original resolver file");
        Ok(true)
    }
}

impl Default for ResolvConf {
    fn default() -> Self {
        Self::new()
    }
}

/// Splice state owned by the listener lifecycle.
///
/// Holds the snapshot taken at splice time until it is restored. Restoring
/// without a snapshot is a no-op, so it is safe on every shutdown path.
#[derive(Debug)]
pub struct ResolvConfGuard {
    file: ResolvConf,
    snapshot: Option<String>,
}

impl ResolvConfGuard {
    /// Creates a guard with nothing spliced yet.
    #[must_use]
    pub const fn new(file: ResolvConf) -> Self {
        Self {
            file,
            snapshot: None,
        }
    }

    /// Returns `true` while a snapshot is waiting to be restored.
    #[must_use]
    pub const fn is_spliced(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Points the resolver file at `listener`.
    ///
    /// Returns the upstream found in the original file. Failures are
    /// logged: a failed read leaves the file alone, a failed write still
    /// keeps the snapshot so a later restore can repair the file.
    pub fn splice(&mut self, listener: SocketAddr) -> Option<Upstream> {
        let plan = match self.file.prepare(listener.ip()) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(
                    path = %self.file.path().display(),
                    error = %e,
                    "failed to read resolver file, not splicing"
                );
                return None;
            }
        };

        // A snapshot from an earlier bind stays authoritative.
        if self.snapshot.is_none() {
            self.snapshot = Some(plan.original.clone());
        }

        match self.file.apply(&plan) {
            Ok(()) => {
                tracing::info!(
                    path = %self.file.path().display(),
                    nameserver = %listener.ip(),
                    "spliced resolver file"
                );
                if listener.port() != DNS_PORT {
                    tracing::warn!(
                        port = listener.port(),
                        "resolver file cannot carry a port; system lookups will not reach this listener"
                    );
                }
            }
            Err(e) if e.is_permission_denied() => {
                tracing::error!(
                    path = %self.file.path().display(),
                    error = %e,
                    "failed to write resolver file (do you need to be root?)"
                );
            }
            Err(e) => {
                tracing::error!(
                    path = %self.file.path().display(),
                    error = %e,
                    "failed to write resolver file"
                );
            }
        }

        plan.upstream
    }

    /// Writes the snapshot back, once.
    pub fn restore(&mut self) {
        let Some(original) = self.snapshot.as_deref() else {
            return;
        };

        match self.file.restore(original) {
            Ok(()) => {
                tracing::info!(path = %self.file.path().display(), "restored resolver file");
                self.snapshot = None;
            }
            Err(e) => tracing::error!(
                path = %self.file.path().display(),
                error = %e,
                "failed to restore resolver file"
            ),
        }
    }
}
