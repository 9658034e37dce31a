//! OS process table access: lookup by executable name, window probe, forced kill.

use anyhow::Result;
#[cfg(not(unix))]
use anyhow::Context;
#[cfg(not(unix))]
use std::process::Command;

/// View of the running processes used by [`ProcessWaiter`](super::ProcessWaiter).
pub trait ProcessTable: Send + Sync {
    /// PID of a live process whose executable name equals `name`.
    ///
    /// Processes that vanish or deny access while being inspected are skipped.
    fn find_by_name(&self, name: &str) -> Option<u32>;

    /// Whether the process owns at least one top-level window.
    ///
    /// On Windows a process qualifies once it has a titled window, and on
    /// macOS once it runs from an application bundle. Linux has no such query
    /// without talking to the display server, so there it only reports
    /// whether the process inherited `DISPLAY` or `WAYLAND_DISPLAY`. Anything
    /// launched from a desktop session passes at spawn time, so a window wait
    /// on Linux confirms the process exists and nothing more.
    fn has_window(&self, pid: u32) -> bool;

    /// Forcefully terminate the process.
    fn kill(&self, pid: u32) -> Result<()>;
}

/// The process table of the machine we run on.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable;

/// Linux truncates `/proc/<pid>/comm` to this many bytes.
#[cfg(target_os = "linux")]
const COMM_MAX_LEN: usize = 15;

/// Compare an executable name against what the OS reports for a process.
///
/// `short_name` may be truncated by the kernel, `full_name` is the untruncated
/// basename when available.
pub(crate) fn name_matches(wanted: &str, short_name: &str, full_name: Option<&str>) -> bool {
    if let Some(full) = full_name {
        if full == wanted {
            return true;
        }
    }
    short_name == wanted || truncated_match(wanted, short_name, full_name)
}

#[cfg(target_os = "linux")]
fn truncated_match(wanted: &str, short_name: &str, full_name: Option<&str>) -> bool {
    wanted.len() > COMM_MAX_LEN
        && short_name.len() == COMM_MAX_LEN
        && wanted.as_bytes().starts_with(short_name.as_bytes())
        && full_name.is_none_or(|full| full.starts_with(short_name))
}

#[cfg(not(target_os = "linux"))]
fn truncated_match(_wanted: &str, _short_name: &str, _full_name: Option<&str>) -> bool {
    false
}

#[cfg(target_os = "linux")]
mod imp {
    use super::name_matches;
    use std::fs;
    use std::path::Path;

    fn is_zombie(proc_dir: &Path) -> bool {
        // Field 3 of /proc/<pid>/stat, after the parenthesised comm which may contain spaces
        fs::read_to_string(proc_dir.join("stat"))
            .ok()
            .and_then(|stat| {
                let rest = &stat[stat.rfind(')')? + 1..];
                rest.split_whitespace().next().map(|state| state == "Z" || state == "X")
            })
            .unwrap_or(true)
    }

    fn argv0_basename(proc_dir: &Path) -> Option<String> {
        let cmdline = fs::read(proc_dir.join("cmdline")).ok()?;
        let argv0 = cmdline.split(|b| *b == 0).next()?;
        let argv0 = String::from_utf8_lossy(argv0);
        // Wine and Windows-style paths use backslashes
        let base = argv0.rsplit(['/', '\\']).next()?.to_string();
        (!base.is_empty()).then_some(base)
    }

    pub(super) fn find_by_name(name: &str) -> Option<u32> {
        let entries = fs::read_dir("/proc").ok()?;

        for entry in entries.flatten() {
            let pid: u32 = match entry.file_name().to_string_lossy().parse() {
                Ok(p) => p,
                Err(_) => continue,
            };

            let proc_dir = entry.path();
            let comm = match fs::read_to_string(proc_dir.join("comm")) {
                Ok(c) => c.trim_end_matches('\n').to_string(),
                Err(_) => continue,
            };

            let truncated = comm.len() == super::COMM_MAX_LEN;
            let full_name = if truncated && name.as_bytes().starts_with(comm.as_bytes()) {
                argv0_basename(&proc_dir)
            } else {
                None
            };

            if !name_matches(name, &comm, full_name.as_deref()) {
                continue;
            }
            if is_zombie(&proc_dir) {
                continue;
            }
            return Some(pid);
        }

        None
    }

    pub(super) fn has_window(pid: u32) -> bool {
        // Display access only; see `ProcessTable::has_window`.
        let environ = match fs::read(format!("/proc/{pid}/environ")) {
            Ok(e) => e,
            Err(_) => return false,
        };
        environ.split(|b| *b == 0).any(|var| {
            var.starts_with(b"DISPLAY=") || var.starts_with(b"WAYLAND_DISPLAY=")
        })
    }
}

#[cfg(target_os = "macos")]
mod imp {
    use super::name_matches;
    use std::process::Command;

    fn list() -> Vec<(u32, String, String)> {
        let output = match Command::new("ps").args(["-axo", "pid=,stat=,comm="]).output() {
            Ok(o) => o,
            Err(_) => return Vec::new(),
        };
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| {
                let mut parts = line.trim_start().splitn(3, char::is_whitespace);
                let pid = parts.next()?.parse().ok()?;
                let stat = parts.next()?.trim().to_string();
                let comm = parts.next()?.trim().to_string();
                Some((pid, stat, comm))
            })
            .collect()
    }

    pub(super) fn find_by_name(name: &str) -> Option<u32> {
        list().into_iter().find_map(|(pid, stat, comm)| {
            let base = comm.rsplit('/').next().unwrap_or(&comm);
            (!stat.starts_with('Z') && name_matches(name, base, None)).then_some(pid)
        })
    }

    pub(super) fn has_window(pid: u32) -> bool {
        // GUI apps run from an application bundle
        list()
            .into_iter()
            .any(|(p, _, comm)| p == pid && comm.contains(".app/Contents/MacOS/"))
    }
}

#[cfg(windows)]
mod imp {
    use super::name_matches;
    use std::process::Command;

    /// Split one `tasklist /FO CSV` row into its quoted fields.
    pub(crate) fn parse_csv_row(line: &str) -> Vec<String> {
        line.trim()
            .trim_start_matches('"')
            .trim_end_matches('"')
            .split("\",\"")
            .map(str::to_string)
            .collect()
    }

    fn tasklist(filter: &str, verbose: bool) -> Vec<Vec<String>> {
        let mut cmd = Command::new("tasklist");
        if verbose {
            cmd.arg("/V");
        }
        let output = match cmd.args(["/FO", "CSV", "/NH", "/FI", filter]).output() {
            Ok(o) => o,
            Err(_) => return Vec::new(),
        };
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| l.starts_with('"'))
            .map(parse_csv_row)
            .collect()
    }

    pub(super) fn find_by_name(name: &str) -> Option<u32> {
        tasklist(&format!("IMAGENAME eq {name}"), false)
            .into_iter()
            .find_map(|row| {
                let image = row.first()?;
                if !name_matches(name, image, None) {
                    return None;
                }
                row.get(1)?.parse().ok()
            })
    }

    pub(super) fn has_window(pid: u32) -> bool {
        tasklist(&format!("PID eq {pid}"), true)
            .into_iter()
            .any(|row| row.last().is_some_and(|title| title != "N/A"))
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
mod imp {
    pub(super) fn find_by_name(_name: &str) -> Option<u32> {
        None
    }

    pub(super) fn has_window(_pid: u32) -> bool {
        false
    }
}

impl ProcessTable for SystemProcessTable {
    fn find_by_name(&self, name: &str) -> Option<u32> {
        imp::find_by_name(name)
    }

    fn has_window(&self, pid: u32) -> bool {
        imp::has_window(pid)
    }

    #[cfg(unix)]
    fn kill(&self, pid: u32) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| anyhow::anyhow!("Invalid PID: {pid}"))?;
        match kill(Pid::from_raw(raw), Signal::SIGKILL) {
            // Already gone
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("Failed to kill process {pid}: {e}")),
        }
    }

    #[cfg(not(unix))]
    fn kill(&self, pid: u32) -> Result<()> {
        let status = Command::new("taskkill")
            .args(["/F", "/PID", &pid.to_string()])
            .status()
            .with_context(|| format!("Failed to run taskkill for process {pid}"))?;
        if !status.success() {
            anyhow::bail!("taskkill failed for process {pid}: {status}");
        }
        Ok(())
    }
}
