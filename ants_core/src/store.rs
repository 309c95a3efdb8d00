//! Saving and loading trained tables with their episode log.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{EnvParams, Error, Result, episode::Episode, policy::PolicyLookup};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SavedRun {
    version: u32,
    lookups: Vec<PolicyLookup>,
    episodes: Vec<Episode>,
}

/// Borrowed form of [`SavedRun`] written by [`Store::save`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SavedRunRef<'a> {
    version: u32,
    lookups: &'a [PolicyLookup],
    episodes: &'a [Episode],
}

impl SavedRun {
    const VERSION: u32 = 1;
}

/// Directory of saved runs, one JSON file per parameter set.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Store { root: root.into() }
    }

    pub fn path_for(&self, params: &EnvParams) -> PathBuf {
        self.root.join(format!("{}.json", params.canonical_name()))
    }

    /// Loads the run saved for `params`. A missing file is a cold start:
    /// fresh zeroed tables, one per agent, and an empty episode log.
    pub fn load(&self, params: &EnvParams) -> Result<(Vec<PolicyLookup>, Vec<Episode>)> {
        let path = self.path_for(params);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no saved run, starting cold");
                let lookups = (0..params.agent_count)
                    .map(|_| PolicyLookup::new(params.grid_size, params.food_count))
                    .collect();
                return Ok((lookups, Vec::new()));
            }
            Err(source) => return Err(Error::Io { path, source }),
        };

        let saved: SavedRun = serde_json::from_reader(BufReader::new(file))?;
        if saved.version != SavedRun::VERSION {
            return Err(Error::UnsupportedVersion {
                found: saved.version,
                expected: SavedRun::VERSION,
            });
        }
        if saved.lookups.len() != params.agent_count {
            return Err(Error::LookupCountMismatch {
                expected: params.agent_count,
                found: saved.lookups.len(),
            });
        }

        info!(
            path = %path.display(),
            episodes = saved.episodes.len(),
            "loaded saved run"
        );
        Ok((saved.lookups, saved.episodes))
    }

    /// Writes tables and episode log for `params`, replacing any earlier save.
    pub fn save(&self, params: &EnvParams, lookups: &[PolicyLookup], episodes: &[Episode]) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).map_err(|source| Error::Io {
            path: self.root.clone(),
            source,
        })?;

        let path = self.path_for(params);
        let file = File::create(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        let saved = SavedRunRef {
            version: SavedRun::VERSION,
            lookups,
            episodes,
        };
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &saved)?;
        writer.flush().map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), episodes = episodes.len(), "saved run");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vector2;

    #[test]
    fn borrowed_envelope_reads_back_as_owned() {
        let lookups = vec![PolicyLookup::new(Vector2::new(2, 3), 1); 2];
        let mut episode = Episode::new();
        episode.record(-1.5);
        episode.record(0.25);
        let episodes = vec![episode, Episode::new()];

        let json = serde_json::to_string(&SavedRunRef {
            version: SavedRun::VERSION,
            lookups: &lookups,
            episodes: &episodes,
        })
        .unwrap();
        assert!(json.starts_with("{\"Version\":1,\"Lookups\":"));

        let saved: SavedRun = serde_json::from_str(&json).unwrap();
        assert_eq!(saved.version, SavedRun::VERSION);
        assert_eq!(saved.lookups, lookups);
        assert_eq!(saved.episodes, episodes);
    }
}
