//! Tape Orchestrator — the exclusive resource manager for the drive.
//!
//! Grounded on `src/tape/drive/mod.rs` and the `MediaChange` trait in
//! `src/tape/changer/mtx.rs` for the load/mount/unmount vocabulary, and on
//! spec.md §9's guidance to model the quadruple (load/mount/unmount/unload)
//! as a builder that tracks which stages succeeded so every exit path from
//! `acquire` leaves the drive in a well-defined state. Concurrency is an
//! in-process `Mutex` (the drive lock) rather than the teacher's
//! cross-process PID-file lock, since spec.md §5 describes multiple
//! threads inside one process serving FUSE callbacks, not several
//! cooperating daemons.

use std::path::PathBuf;
use std::process::Command;
use std::sync::{Condvar, Mutex};

use log::{info, warn};

use crate::config::Config;
use crate::error::{Result, TapeVaultError};
use crate::tape::changer::{ChangerInterface, InventorySnapshot};
use crate::tools;

/// The drive's internal state. Mirrors spec.md §4.4's
/// IDLE → LOADING → MOUNTED → UNMOUNTING → UNLOADING → IDLE machine; the
/// transitional states exist only as log markers around the blocking
/// subprocess calls that realize them, since nothing else can observe the
/// orchestrator mid-transition while the drive lock is held. `refcount`
/// tracks how many outstanding `MountHandle`s currently reference the
/// mounted tape, so concurrent callers for the *same* tape join the one
/// physical session instead of each driving their own load/mount cycle (the
/// "reuse: same tape next" loop in the diagram); the drive is only
/// unmounted/unloaded once the last one releases.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DriveState {
    Idle,
    Mounted {
        volume_tag: String,
        slot: Option<u64>,
        loaded_by_us: bool,
        refcount: usize,
    },
}

/// A scoped capability granting use of the mounted target tape.
///
/// Dropping it without calling [`TapeOrchestrator::release`] leaves the
/// drive mounted and its reference held forever; callers must always
/// release explicitly (the orchestrator has no destructor-based
/// auto-release since unmounting can fail and failures must be observable
/// by the caller).
pub struct MountHandle {
    pub volume_tag: String,
    pub mount_path: PathBuf,
    pub total_space: u64,
    pub free_space: u64,
    /// True if this acquire actually loaded the tape (vs. joining an
    /// already-mounted drive held by another caller).
    pub loaded_by_us: bool,
    slot: Option<u64>,
}

struct Inner {
    state: DriveState,
}

/// Owns the single physical drive.
pub struct TapeOrchestrator {
    changer: ChangerInterface,
    tape_device: String,
    mount_base: PathBuf,
    inner: Mutex<Inner>,
    /// Signaled whenever the drive becomes free of a tape, so an `acquire`
    /// call waiting on a *different* tape's session can recheck the state
    /// instead of busy-polling the mutex.
    drive_free: Condvar,
}

impl TapeOrchestrator {
    pub fn new(config: &Config) -> Self {
        TapeOrchestrator {
            changer: ChangerInterface::new(config.changer_device.clone()),
            tape_device: config.tape_device.clone(),
            mount_base: config.temp_mount_base.clone(),
            inner: Mutex::new(Inner {
                state: DriveState::Idle,
            }),
            drive_free: Condvar::new(),
        }
    }

    pub fn changer(&self) -> &ChangerInterface {
        &self.changer
    }

    /// Acquire use of `target_tag`, mounted and ready.
    ///
    /// If the drive already holds `target_tag`, this call joins the
    /// existing session (no subprocess calls) rather than racing a second
    /// load/mount — §8's "two threads open different files of the same
    /// tape" property depends on every concurrent request for the same tag
    /// collapsing into the one physical session. If the drive holds some
    /// other tape, this call blocks on [`Self::drive_free`] until every
    /// handle on that other tape has been released (and the drive
    /// unmounted/unloaded by the last one), so no caller ever sees its
    /// mount torn down by a swap mid-use — the failure mode this fixes.
    /// Otherwise `target_tag` is located in `inventory`, loaded, and
    /// mounted.
    pub fn acquire(&self, target_tag: &str, inventory: &InventorySnapshot) -> Result<MountHandle> {
        let mut guard = self.inner.lock().unwrap();

        loop {
            match &mut guard.state {
                DriveState::Mounted {
                    volume_tag,
                    slot,
                    refcount,
                    ..
                } if volume_tag == target_tag => {
                    *refcount += 1;
                    info!("joining existing mount of {target_tag} ({refcount} holders)");
                    let slot = *slot;
                    let mount_path = self.mount_base.join(target_tag);
                    let (total_space, free_space) = statfs_space(&mount_path)?;
                    return Ok(MountHandle {
                        volume_tag: target_tag.to_string(),
                        mount_path,
                        total_space,
                        free_space,
                        loaded_by_us: false,
                        slot,
                    });
                }
                DriveState::Mounted { volume_tag, .. } => {
                    let other_tag = volume_tag.clone();
                    info!("{target_tag} waiting on {other_tag}'s session to release the drive");
                    guard = self
                        .drive_free
                        .wait_while(guard, |inner| {
                            matches!(&inner.state, DriveState::Mounted { volume_tag, .. } if volume_tag != target_tag)
                        })
                        .unwrap();
                    // Loop back: the drive may now be IDLE, or another
                    // waiter may have already loaded `target_tag` for us.
                }
                DriveState::Idle => break,
            }
        }

        // IDLE -> LOADING: locate the target tape in the snapshot.
        let slot = inventory
            .slot_of(target_tag)
            .filter(|_| !inventory.is_loaded(target_tag));

        let loaded_by_us = if inventory.is_loaded(target_tag) {
            false
        } else {
            let slot = slot.ok_or_else(|| TapeVaultError::TapeNotFound(target_tag.to_string()))?;
            info!("loading {target_tag} from slot {slot}");
            self.changer.load(slot)?;
            true
        };

        // LOADING -> mount.
        let mount_path = self.mount_base.join(target_tag);
        if let Err(err) = std::fs::create_dir_all(&mount_path) {
            if loaded_by_us {
                self.changer.unload(slot);
            }
            return Err(err.into());
        }

        if let Err(err) = mount_ltfs(&self.tape_device, &mount_path) {
            // Mount failed: attempt to unload and fail MountFailed.
            if loaded_by_us {
                self.changer.unload(slot);
            }
            return Err(TapeVaultError::MountFailed {
                volume_tag: target_tag.to_string(),
                source: err,
            });
        }

        let (total_space, free_space) = statfs_space(&mount_path)?;

        guard.state = DriveState::Mounted {
            volume_tag: target_tag.to_string(),
            slot,
            loaded_by_us,
            refcount: 1,
        };

        Ok(MountHandle {
            volume_tag: target_tag.to_string(),
            mount_path,
            total_space,
            free_space,
            loaded_by_us,
            slot,
        })
    }

    /// Drops this handle's reference to the mounted session. Once the last
    /// concurrent holder of `handle.volume_tag` releases, the drive always
    /// unmounts; if that last release's session `loaded_by_us`, it also
    /// unloads back to the original slot. Both are best-effort; the drive
    /// returns to IDLE regardless of whether the unmount/unload tools
    /// succeed, and any caller blocked in `acquire` on a different tag is
    /// woken to recheck the drive.
    pub fn release(&self, handle: MountHandle) {
        let mut guard = self.inner.lock().unwrap();

        if let DriveState::Mounted { refcount, .. } = &mut guard.state {
            *refcount -= 1;
            if *refcount > 0 {
                return;
            }
        }

        unmount_best_effort(&handle.mount_path);
        if handle.loaded_by_us {
            self.changer.unload(handle.slot);
        }
        guard.state = DriveState::Idle;
        drop(guard);
        self.drive_free.notify_all();
    }
}

fn mount_ltfs(tape_device: &str, mount_path: &std::path::Path) -> anyhow::Result<()> {
    let mut cmd = Command::new("ltfs");
    cmd.arg("-o").arg(format!("devname={tape_device}"));
    cmd.arg(mount_path);
    tools::run(cmd).map_err(anyhow::Error::from)?;
    Ok(())
}

fn unmount_best_effort(mount_path: &std::path::Path) {
    let mount_str = mount_path.to_string_lossy().into_owned();

    let mut umount = Command::new("umount");
    umount.arg(&mount_str);
    if tools::run(umount).is_ok() {
        return;
    }

    let mut fusermount = Command::new("fusermount");
    fusermount.args(["-u", &mount_str]);
    if let Err(err) = tools::run(fusermount) {
        warn!("unmount of {mount_str} failed (both umount and fusermount -u): {err}");
    }
}

/// Stat the mount to capture (total_space, free_space): block count ×
/// frag size, available blocks × frag size.
fn statfs_space(mount_path: &std::path::Path) -> Result<(u64, u64)> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(mount_path.as_os_str().as_bytes()).map_err(|e| {
        TapeVaultError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    })?;

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(TapeVaultError::Io(std::io::Error::last_os_error()));
    }

    let total = stat.f_blocks as u64 * stat.f_frsize as u64;
    let free = stat.f_bavail as u64 * stat.f_frsize as u64;
    Ok((total, free))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::changer::DriveLoaded;
    use std::collections::HashMap;

    #[test]
    fn reuse_mount_when_already_loaded() {
        // Regression guard for the no-op path: when the orchestrator's
        // internal state already matches the target tag, acquire() must
        // not invoke the changer at all. We can't easily stub `mtx`
        // itself here without a fake PATH, so this test only exercises
        // the pure decision logic via the snapshot helpers it depends on.
        let snap = InventorySnapshot {
            drive_loaded: Some(DriveLoaded {
                drive_id: 0,
                volume_tag: "VOL001".to_string(),
            }),
            ..Default::default()
        };
        assert!(snap.is_loaded("VOL001"));
        assert!(!snap.is_loaded("VOL002"));
    }

    #[test]
    fn target_not_in_snapshot_is_tape_not_found() {
        let snap = InventorySnapshot {
            slots: HashMap::new(),
            drive_loaded: None,
        };
        assert_eq!(snap.slot_of("VOL999"), None);
    }
}
