//! Runtime configuration, gathered once at startup from the environment.
//!
//! Mirrors the teacher's `pbs-buildcfg` pattern of compiled-in defaults
//! overridable by environment variables, collected into a single struct
//! instead of scattered `lazy_static`s since every value here really is a
//! per-process runtime setting, not a build-time constant.

use std::path::PathBuf;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Tape-vault configuration, resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Generic SCSI device for the robotic changer.
    pub changer_device: String,
    /// Raw tape device for the drive.
    pub tape_device: String,
    /// Catalog database file.
    pub db_path: PathBuf,
    /// Parent of per-tape mount points and of `cache/`.
    pub temp_mount_base: PathBuf,
    /// HTTP port for the auxiliary web view.
    pub web_port: u16,
}

impl Config {
    /// Gather configuration from the environment, applying the documented
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let web_port = env_or("WEB_PORT", "5002").parse().unwrap_or(5002);

        Config {
            changer_device: env_or("CHANGER_DEVICE", "/dev/sg1"),
            tape_device: env_or("TAPE_DEVICE", "/dev/st0"),
            db_path: PathBuf::from(env_or("DB_PATH", "/var/lib/tapevault/tapevault.db")),
            temp_mount_base: PathBuf::from(env_or("TEMP_MOUNT_BASE", "/tmp/ltfs_mounts")),
            web_port,
        }
    }

    /// Mount point directory for a given volume tag.
    pub fn mount_dir(&self, volume_tag: &str) -> PathBuf {
        self.temp_mount_base.join(volume_tag)
    }

    /// Root of the on-disk cache tree.
    pub fn cache_root(&self) -> PathBuf {
        self.temp_mount_base.join("cache")
    }

    /// Cache path for one tape-relative file.
    pub fn cache_path(&self, volume_tag: &str, relative_path: &str) -> PathBuf {
        self.cache_root().join(volume_tag).join(relative_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        // Clear any variables a prior test or the outer shell may have set.
        for var in [
            "CHANGER_DEVICE",
            "TAPE_DEVICE",
            "DB_PATH",
            "TEMP_MOUNT_BASE",
            "WEB_PORT",
        ] {
            std::env::remove_var(var);
        }
        let cfg = Config::from_env();
        assert_eq!(cfg.changer_device, "/dev/sg1");
        assert_eq!(cfg.tape_device, "/dev/st0");
        assert_eq!(
            cfg.db_path,
            PathBuf::from("/var/lib/tapevault/tapevault.db")
        );
        assert_eq!(cfg.temp_mount_base, PathBuf::from("/tmp/ltfs_mounts"));
        assert_eq!(cfg.web_port, 5002);
    }

    #[test]
    fn cache_path_layout() {
        let mut cfg = Config::from_env();
        cfg.temp_mount_base = PathBuf::from("/tmp/ltfs_mounts");
        assert_eq!(
            cfg.cache_path("VOL001", "data/a.bin"),
            PathBuf::from("/tmp/ltfs_mounts/cache/VOL001/data/a.bin")
        );
    }
}
