//! Shared end-to-end test harness: fakes `mtx`/`ltfs`/`umount`/`fusermount`
//! as shell scripts on a temporary `PATH`, so the orchestrator, indexer,
//! reconciler and fetcher can be exercised against real subprocess calls
//! without a real tape library attached.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Mutex;

use tapevault::config::Config;

/// Serializes every test that mutates the process-wide `PATH`.
pub static HARNESS_LOCK: Mutex<()> = Mutex::new(());

pub struct Harness {
    _root: tempfile::TempDir,
    pub config: Config,
    pub harness_dir: PathBuf,
    old_path: String,
}

impl Harness {
    /// `layout`: slot id -> (volume tag, files as (relative_path, contents, mtime_unix)).
    pub fn new(layout: &[(u64, &str, &[(&str, &[u8], i64)])]) -> Self {
        let root = tempfile::tempdir().unwrap();
        let harness_dir = root.path().join("harness");
        let bin_dir = root.path().join("bin");
        let fixtures_dir = harness_dir.join("fixtures");
        fs::create_dir_all(&bin_dir).unwrap();
        fs::create_dir_all(&fixtures_dir).unwrap();

        let mut slots = String::new();
        for (slot, tag, files) in layout {
            slots.push_str(&format!("{slot}:{tag}\n"));
            let tape_dir = fixtures_dir.join(tag);
            for (rel_path, contents, mtime) in *files {
                let file_path = tape_dir.join(rel_path);
                fs::create_dir_all(file_path.parent().unwrap()).unwrap();
                fs::write(&file_path, contents).unwrap();
                set_mtime(&file_path, *mtime);
            }
        }
        fs::write(harness_dir.join("slots.txt"), slots).unwrap();
        fs::write(harness_dir.join("state.txt"), "").unwrap();

        write_script(&bin_dir.join("mtx"), MTX_SCRIPT);
        write_script(&bin_dir.join("ltfs"), LTFS_SCRIPT);
        write_script(&bin_dir.join("umount"), TRUE_SCRIPT);
        write_script(&bin_dir.join("fusermount"), TRUE_SCRIPT);

        let old_path = std::env::var("PATH").unwrap_or_default();
        std::env::set_var("PATH", format!("{}:{}", bin_dir.display(), old_path));
        std::env::set_var("TV_HARNESS", &harness_dir);

        let config = Config {
            changer_device: "/dev/sg-test".to_string(),
            tape_device: "/dev/st-test".to_string(),
            db_path: root.path().join("catalog.db"),
            temp_mount_base: root.path().join("mounts"),
            web_port: 0,
        };

        Harness {
            _root: root,
            config,
            harness_dir,
            old_path,
        }
    }

    /// Replace the slot layout the fake `mtx` reports, simulating tapes
    /// being physically removed or added between reconciliations.
    pub fn set_slots(&self, slots: &[(u64, &str)]) {
        let mut body = String::new();
        for (slot, tag) in slots {
            body.push_str(&format!("{slot}:{tag}\n"));
        }
        fs::write(self.harness_dir.join("slots.txt"), body).unwrap();
    }

    /// Force the next `ltfs` mount of `volume_tag` to fail exactly once.
    pub fn fail_next_mount(&self, volume_tag: &str) {
        fs::write(
            self.harness_dir.join(format!("fail_once_{volume_tag}")),
            b"",
        )
        .unwrap();
    }

    /// Number of times `mtx ... load <slot> 0` has been invoked for `volume_tag`.
    pub fn load_count(&self, volume_tag: &str) -> usize {
        let path = self.harness_dir.join(format!("load_count_{volume_tag}"));
        match fs::read_to_string(path) {
            Ok(s) => s.trim().parse().unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Break `mtx`/`ltfs` so any further subprocess invocation fails loudly,
    /// used to prove a cache hit takes no subprocess path at all.
    pub fn sabotage_tools(&self) {
        let bin_dir = self._root.path().join("bin");
        write_script(&bin_dir.join("mtx"), "#!/bin/sh\necho boom >&2\nexit 1\n");
        write_script(&bin_dir.join("ltfs"), "#!/bin/sh\necho boom >&2\nexit 1\n");
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        std::env::set_var("PATH", &self.old_path);
        std::env::remove_var("TV_HARNESS");
    }
}

fn write_script(path: &PathBuf, contents: &str) {
    fs::write(path, contents).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

fn set_mtime(path: &PathBuf, unix_secs: i64) {
    let status = std::process::Command::new("touch")
        .arg("-d")
        .arg(format!("@{unix_secs}"))
        .arg(path)
        .status()
        .unwrap();
    assert!(status.success());
}

const MTX_SCRIPT: &str = r#"#!/bin/sh
set -e
shift # drop -f
dev="$1"; shift
sub="$1"; shift

slots_file="$TV_HARNESS/slots.txt"
state_file="$TV_HARNESS/state.txt"

case "$sub" in
  status)
    loaded=$(cat "$state_file" 2>/dev/null || true)
    echo "Storage Changer $dev:1 Drives, 16 Slots ( 1 Import/Export )"
    if [ -n "$loaded" ]; then
      loaded_slot=$(grep ":$loaded\$" "$slots_file" | cut -d: -f1)
      echo "Data Transfer Element 0:Full (Storage Element $loaded_slot Loaded):VolumeTag = $loaded"
    else
      echo "Data Transfer Element 0:Empty"
    fi
    while IFS=: read -r slot tag; do
      [ -z "$tag" ] && continue
      if [ "$tag" != "$loaded" ]; then
        echo "      Storage Element $slot:Full :VolumeTag = $tag"
      fi
    done < "$slots_file"
    ;;
  load)
    slot="$1"
    tag=$(grep "^$slot:" "$slots_file" | cut -d: -f2)
    echo "$tag" > "$state_file"
    count_file="$TV_HARNESS/load_count_$tag"
    count=$(cat "$count_file" 2>/dev/null || echo 0)
    echo $((count + 1)) > "$count_file"
    ;;
  unload)
    : > "$state_file"
    ;;
esac
"#;

const LTFS_SCRIPT: &str = r#"#!/bin/sh
set -e
shift # drop -o
shift # drop devname=...
mountpoint="$1"

loaded=$(cat "$TV_HARNESS/state.txt" 2>/dev/null || true)
if [ -z "$loaded" ]; then
  echo "ltfs: no tape loaded" >&2
  exit 1
fi

failmarker="$TV_HARNESS/fail_once_$loaded"
if [ -f "$failmarker" ]; then
  rm -f "$failmarker"
  echo "ltfs: simulated mount failure for $loaded" >&2
  exit 1
fi

cp -a "$TV_HARNESS/fixtures/$loaded/." "$mountpoint/"
"#;

const TRUE_SCRIPT: &str = "#!/bin/sh\nexit 0\n";
