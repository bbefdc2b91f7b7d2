//!
//! src/sink.rs  Oct 18th, 2026
//!
//! Compressed on-disk archive of raw discovery payloads, one zstd json
//! file per catalog track that made it into the store.
//!

use std::{fs, path::{Path, PathBuf}};
use serde_json::Value;

use crate::errors::IngestError;

#[derive(Debug, Clone, Copy)]
pub enum RawType {
    DeezerTrack
}

#[derive(Debug, Clone)]
pub struct DiskZstdSink {
    root: PathBuf,
    level: i32
}

impl DiskZstdSink {
    pub fn new(root: impl AsRef<Path>, level: i32) -> Self {
        Self { root: root.as_ref().to_path_buf(), level: level.clamp(0, 21) }
    }

    pub fn write_json(&self, kind: RawType, key: &str, mut json: Value) ->
        Result<PathBuf, IngestError> {
        match kind {
            RawType::DeezerTrack => Self::prune_deezer_track(&mut json)
        }

        let path = self.root.join(Self::rel_path(kind, &Self::sanitize_key(key)));
        let parent = path.parent()
            .ok_or_else(|| IngestError::Config(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(parent)?;

        let temp = tempfile::NamedTempFile::new_in(parent)?;
        {
            let mut enc = zstd::stream::write::Encoder::new(temp.as_file(), self.level)?;
            serde_json::to_writer(&mut enc, &json)?;
            enc.finish()?;
        }

        temp.persist(&path)
            .map_err(|e| IngestError::Io(e.error))?;
        Ok(path)
    }

    #[cfg(test)]
    pub fn read_json(&self, kind: RawType, key: &str) -> Result<Value, IngestError> {
        let path = self.root.join(Self::rel_path(kind, &Self::sanitize_key(key)));
        let file = fs::File::open(&path)?;
        let dec = zstd::stream::read::Decoder::new(file)?;
        Ok(serde_json::from_reader(dec)?)
    }

    fn rel_path(kind: RawType, key: &str) -> PathBuf {
        match kind {
            RawType::DeezerTrack =>
                PathBuf::from("deezer/track").join(format!("{key}.json.zst"))
        }
    }

    fn sanitize_key(key: &str) -> String {
        key.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }

    /// Drops links and preview data that are never read back
    fn prune_deezer_track(v: &mut Value) {
        if let Some(track) = v.as_object_mut() {
            for key in ["link", "preview", "md5_image", "type", "readable"] {
                track.remove(key);
            }
        }
        for parent in ["artist", "album"] {
            if let Some(object) = v.get_mut(parent).and_then(|p| p.as_object_mut()) {
                object.retain(|k, _| !k.starts_with("picture") && k != "tracklist" && k != "type");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_pruned_compressed_json() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DiskZstdSink::new(dir.path(), 3);
        let raw = json!({
            "id": 3135556,
            "title": "Firestone",
            "link": "https://www.deezer.com/track/3135556",
            "preview": "https://cdns-preview/x.mp3",
            "artist": {"name": "Kygo", "picture_big": "p", "tracklist": "t"},
            "album": {"title": "Cloud Nine", "cover_big": "c", "type": "album"}
        });

        let path = sink.write_json(RawType::DeezerTrack, "Kygo/Firestone", raw).unwrap();
        assert!(path.ends_with("deezer/track/Kygo_Firestone.json.zst"));

        let back = sink.read_json(RawType::DeezerTrack, "Kygo/Firestone").unwrap();
        assert_eq!(back["title"], "Firestone");
        assert!(back.get("preview").is_none());
        assert_eq!(back["artist"], json!({"name": "Kygo"}));
        assert_eq!(back["album"], json!({"title": "Cloud Nine", "cover_big": "c"}));
    }
}
