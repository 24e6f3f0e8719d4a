//! Small free functions with no better home: the on-target environment
//! gate used by the sensor and relay drivers to decide between touching
//! real hardware and logging what they would have done.

/// True only when running on the actual target hardware: Linux, hostname
/// `raspberrypi`. Everywhere else (dev machines, CI) the sensor and relay
/// modules log their intended action instead of touching sysfs.
pub fn on_target() -> bool {
    if !cfg!(target_os = "linux") {
        return false;
    }
    hostname() == "raspberrypi"
}

fn hostname() -> String {
    nix_hostname().unwrap_or_default()
}

#[cfg(target_os = "linux")]
fn nix_hostname() -> Option<String> {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
}

#[cfg(not(target_os = "linux"))]
fn nix_hostname() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_target_is_false_off_hardware() {
        // CI/dev hosts are never named `raspberrypi`, so this always holds
        // outside the real device.
        assert!(!on_target() || hostname() == "raspberrypi");
    }
}
