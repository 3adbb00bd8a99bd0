//! Changer Interface — probes `mtx status` and parses it into a structured
//! inventory snapshot.
//!
//! Grounded structurally on `src/tape/changer/parse_mtx_status.rs` (an
//! `ElementStatus`-like distinction between empty/full/tagged elements) and
//! on `mtx_wrapper.rs` (one thin function per `mtx` subcommand), but parses
//! with line-oriented `regex` matching per spec.md's line-shape table
//! rather than a `nom` grammar, since `mtx status` output here is the
//! tolerant, loosely structured text the original Python implementation
//! also just regex-matches line by line.

use std::collections::HashMap;
use std::process::Command;

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::error::Result;
use crate::tools;

lazy_static! {
    static ref DRIVE_RE: Regex =
        Regex::new(r"Data Transfer Element (\d+):Full.*VolumeTag\s*=\s*(\S+)").unwrap();
    static ref SLOT_RE: Regex =
        Regex::new(r"Storage Element (\d+):Full.*VolumeTag\s*=\s*(\S+)").unwrap();
}

/// A tape loaded in the drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveLoaded {
    pub drive_id: u64,
    pub volume_tag: String,
}

/// One probe's view of which tapes are in which slots and in the drive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventorySnapshot {
    /// slot id -> volume tag, for non-empty storage elements.
    pub slots: HashMap<u64, String>,
    pub drive_loaded: Option<DriveLoaded>,
}

impl InventorySnapshot {
    /// Locate a volume tag's slot, if it is currently in a slot.
    pub fn slot_of(&self, volume_tag: &str) -> Option<u64> {
        self.slots
            .iter()
            .find(|(_, tag)| tag.as_str() == volume_tag)
            .map(|(slot, _)| *slot)
    }

    /// True if `volume_tag` is currently loaded in the drive.
    pub fn is_loaded(&self, volume_tag: &str) -> bool {
        self.drive_loaded
            .as_ref()
            .is_some_and(|d| d.volume_tag == volume_tag)
    }

    /// The set of every volume tag currently visible in the library
    /// (in a slot, or in the drive).
    pub fn present_volume_tags(&self) -> std::collections::HashSet<String> {
        let mut present: std::collections::HashSet<String> = self.slots.values().cloned().collect();
        if let Some(drive) = &self.drive_loaded {
            present.insert(drive.volume_tag.clone());
        }
        present
    }
}

/// Parse `mtx status` output per spec.md §4.2's recognized line shapes.
///
/// Unknown lines, empty elements, and `IMPORT/EXPORT` lines are ignored;
/// parsing never fails on unrecognized text — only a missing binary or a
/// non-zero exit fails the probe.
pub fn parse_mtx_status(output: &str) -> InventorySnapshot {
    let mut snapshot = InventorySnapshot::default();

    for line in output.lines() {
        let line = line.trim();

        if line.contains("IMPORT/EXPORT") {
            continue;
        }

        if let Some(caps) = DRIVE_RE.captures(line) {
            let drive_id: u64 = caps[1].parse().unwrap_or(0);
            snapshot.drive_loaded = Some(DriveLoaded {
                drive_id,
                volume_tag: caps[2].to_string(),
            });
            continue;
        }

        if let Some(caps) = SLOT_RE.captures(line) {
            let slot_id: u64 = caps[1].parse().unwrap_or(0);
            snapshot.slots.insert(slot_id, caps[2].to_string());
            continue;
        }
        // Empty elements and all other lines: ignored.
    }

    snapshot
}

/// Changer Interface: probes the robotic changer and issues load/unload.
pub struct ChangerInterface {
    changer_device: String,
}

impl ChangerInterface {
    pub fn new(changer_device: impl Into<String>) -> Self {
        ChangerInterface {
            changer_device: changer_device.into(),
        }
    }

    /// Invoke the changer-status tool and parse its output.
    pub fn probe(&self) -> Result<InventorySnapshot> {
        let mut cmd = Command::new("mtx");
        cmd.args(["-f", &self.changer_device, "status"]);
        let output = tools::run(cmd)?;
        debug!("probed changer, raw output:\n{output}");
        Ok(parse_mtx_status(&output))
    }

    /// Load `slot` into drive 0.
    pub fn load(&self, slot: u64) -> Result<()> {
        let mut cmd = Command::new("mtx");
        cmd.args(["-f", &self.changer_device, "load", &slot.to_string(), "0"]);
        tools::run(cmd)?;
        Ok(())
    }

    /// Return the loaded tape to `slot` (or any open slot if `None`).
    /// Best-effort: an already-empty drive must not fail the caller.
    pub fn unload(&self, slot: Option<u64>) {
        let mut cmd = Command::new("mtx");
        cmd.arg("-f").arg(&self.changer_device).arg("unload");
        if let Some(slot) = slot {
            cmd.arg(slot.to_string()).arg("0");
        }
        tools::run_best_effort(cmd);
    }
}
