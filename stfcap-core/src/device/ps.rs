//! Process-listing parsing for [`DeviceAgent::kill_by_name`].
//!
//! `ps` output varies between toolbox, toybox and busybox, so the PID column
//! is located from the header line instead of assumed.
//!
//! [`DeviceAgent::kill_by_name`]: super::DeviceAgent::kill_by_name

/// PIDs of every listing line that mentions `name`.
pub fn matching_pids(listing: &str, name: &str) -> Vec<u32> {
    let mut lines = listing.trim().lines();
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let pid_index = header
        .split_whitespace()
        .position(|column| column == "PID")
        .unwrap_or(0);

    lines
        .filter(|line| line.contains(name))
        .filter_map(|line| line.split_whitespace().nth(pid_index))
        .filter_map(|pid| pid.parse().ok())
        .collect()
}
