//! Append-only JSONL sink for per-cycle episode records.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::models::episode::Episode;

/// Append one episode as a single JSON line, creating parent
/// directories on first use.
pub fn append(path: &Path, episode: &Episode) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }
    }

    let line = serde_json::to_string(episode)
        .map_err(|e| format!("failed to serialize episode: {}", e))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("failed to open {}: {}", path.display(), e))?;
    writeln!(file, "{}", line).map_err(|e| format!("failed to write {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::episode::{Reward, RoomState, State};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!("taktguard-{}-{}", name, std::process::id()));
            let _ = fs::remove_dir_all(&path);
            TempDir(path)
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn episode(watts: f64) -> Episode {
        let mut rooms = BTreeMap::new();
        rooms.insert("wohnzimmer".to_string(), RoomState::new(20.5, 21.0, true));
        let state = State::new(
            Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap(),
            watts,
            false,
            None,
            rooms,
            Vec::new(),
        );
        Episode::new(
            &state,
            &[],
            Reward { comfort: -0.5, stability: 0.0, energy: -watts / 500.0, total: 0.0 },
        )
    }

    #[test]
    fn appends_one_line_per_episode_and_creates_parents() {
        let dir = TempDir::new("episode-log");
        let path = dir.0.join("logs").join("episodes.jsonl");

        append(&path, &episode(850.0)).expect("first append succeeds");
        append(&path, &episode(400.0)).expect("second append succeeds");

        let content = fs::read_to_string(&path).expect("log readable");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            let parsed: Episode = serde_json::from_str(line).expect("each line is one record");
            assert_eq!(parsed.state.rooms.len(), 1);
        }
        let second: Episode = serde_json::from_str(lines[1]).expect("line parses");
        assert_eq!(second.state.power, 400.0);
    }
}
