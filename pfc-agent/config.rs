use std::path::{Path, PathBuf};

/// Environment variable prefixing every sysfs/devfs path the session opens
pub const SYSFS_ROOT_ENV: &str = "PFC_SYSFS_ROOT";

const RDPMC_CONTROL: &str = "sys/bus/event_source/devices/cpu/rdpmc";
const CPU_ONLINE: &str = "sys/devices/system/cpu/online";

fn sysfs_root() -> PathBuf {
    std::env::var_os(SYSFS_ROOT_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Core whose counters the session programs and samples
    pub core: usize,
    /// MSR device of `core`
    pub msr_device: PathBuf,
    /// User-space RDPMC control file
    pub rdpmc_control: PathBuf,
    /// Zero every counter and control register during the handshake
    pub reset_on_init: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::for_core(0)
    }
}

impl SessionConfig {
    /// Default paths for `core`, honouring `PFC_SYSFS_ROOT`
    pub fn for_core(core: usize) -> Self {
        Self::with_root(&sysfs_root(), core)
    }

    /// Paths for `core` under an explicit root directory
    pub fn with_root(root: &Path, core: usize) -> Self {
        Self {
            core,
            msr_device: root.join(format!("dev/cpu/{core}/msr")),
            rdpmc_control: root.join(RDPMC_CONTROL),
            reset_on_init: true,
        }
    }

    /// Detect online CPUs from /sys/devices/system/cpu/online
    pub fn detect_online_cpus() -> Vec<usize> {
        Self::online_cpus_under(&sysfs_root())
    }

    /// Online CPUs listed under an explicit root directory
    pub fn online_cpus_under(root: &Path) -> Vec<usize> {
        std::fs::read_to_string(root.join(CPU_ONLINE))
            .ok()
            .and_then(|s| Self::parse_cpu_list(&s))
            .unwrap_or_else(|| {
                tracing::warn!("Failed to detect online CPUs, using default: 0");
                vec![0]
            })
    }

    /// Parse CPU list like "0-3,8-11" into Vec<usize>
    pub fn parse_cpu_list(s: &str) -> Option<Vec<usize>> {
        let mut cpus = Vec::new();
        for part in s.trim().split(',') {
            if let Some((start, end)) = part.split_once('-') {
                let start: usize = start.parse().ok()?;
                let end: usize = end.parse().ok()?;
                if end < start {
                    return None;
                }
                cpus.extend(start..=end);
            } else {
                cpus.push(part.parse().ok()?);
            }
        }
        Some(cpus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_under_root() {
        let config = SessionConfig::with_root(Path::new("/tmp/fake"), 3);
        assert_eq!(config.msr_device, PathBuf::from("/tmp/fake/dev/cpu/3/msr"));
        assert_eq!(
            config.rdpmc_control,
            PathBuf::from("/tmp/fake/sys/bus/event_source/devices/cpu/rdpmc")
        );
        assert!(config.reset_on_init);

        let native = SessionConfig::with_root(Path::new("/"), 0);
        assert_eq!(native.msr_device, PathBuf::from("/dev/cpu/0/msr"));
    }

    #[test]
    fn test_online_cpus_under_root() {
        let root = std::env::temp_dir().join(format!("pfc-online-{}", std::process::id()));
        let dir = root.join("sys/devices/system/cpu");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("online"), "0-1,4\n").unwrap();

        assert_eq!(SessionConfig::online_cpus_under(&root), vec![0, 1, 4]);
        // An unreadable list falls back to CPU 0.
        assert_eq!(SessionConfig::online_cpus_under(&root.join("missing")), vec![0]);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(
            SessionConfig::parse_cpu_list("0-3,8\n"),
            Some(vec![0, 1, 2, 3, 8])
        );
        assert_eq!(SessionConfig::parse_cpu_list("5"), Some(vec![5]));
        assert_eq!(SessionConfig::parse_cpu_list("3-1"), None);
        assert_eq!(SessionConfig::parse_cpu_list("a-b"), None);
    }
}
