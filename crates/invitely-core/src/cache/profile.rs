use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::ProfileSummary;

/// Profile cache file name in the cache directory
const PROFILE_FILE: &str = "profile.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        let now = Utc::now();
        (now - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Includes clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

/// On-disk cache of the signed-in user's [`ProfileSummary`].
///
/// A display convenience only. Losing it never affects the session; the
/// access credential is never written here.
#[derive(Debug, Clone)]
pub struct ProfileCache {
    cache_dir: Option<PathBuf>,
}

impl ProfileCache {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir: Some(cache_dir),
        })
    }

    /// A cache that stores nothing and always reads empty.
    pub fn disabled() -> Self {
        Self { cache_dir: None }
    }

    fn profile_path(&self) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| dir.join(PROFILE_FILE))
    }

    pub fn load(&self) -> Result<Option<CachedData<ProfileSummary>>> {
        let path = match self.profile_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(None),
        };

        let contents = std::fs::read_to_string(&path).context("Failed to read profile cache")?;
        let cached = serde_json::from_str(&contents).context("Failed to parse profile cache")?;
        Ok(Some(cached))
    }

    /// Like [`load`](Self::load), treating unreadable files as absent.
    pub fn load_or_none(&self) -> Option<CachedData<ProfileSummary>> {
        match self.load() {
            Ok(cached) => cached,
            Err(e) => {
                debug!(error = %e, "Ignoring unreadable profile cache");
                None
            }
        }
    }

    pub fn save(&self, profile: &ProfileSummary) -> Result<()> {
        let Some(path) = self.profile_path() else {
            return Ok(());
        };
        let contents = serde_json::to_string_pretty(&CachedData::new(profile))?;
        std::fs::write(&path, contents)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if let Some(path) = self.profile_path() {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn profile() -> ProfileSummary {
        ProfileSummary {
            id: "u1".to_string(),
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
        }
    }

    #[test]
    fn test_cached_data_age_display() {
        let mut cached = CachedData::new(1);
        assert_eq!(cached.age_display(), "just now");

        cached.cached_at = Utc::now() - Duration::minutes(5);
        assert_eq!(cached.age_display(), "5m ago");

        cached.cached_at = Utc::now() - Duration::minutes(150);
        assert_eq!(cached.age_display(), "2h ago");

        cached.cached_at = Utc::now() - Duration::days(3);
        assert_eq!(cached.age_display(), "3d ago");

        cached.cached_at = Utc::now() + Duration::minutes(10);
        assert_eq!(cached.age_display(), "just now");
    }

    #[test]
    fn test_save_load_clear() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ProfileCache::new(dir.path().to_path_buf()).expect("cache");

        assert!(cache.load().expect("load").is_none());
        cache.save(&profile()).expect("save");
        assert_eq!(cache.load_or_none().map(|c| c.data), Some(profile()));

        cache.clear().expect("clear");
        assert!(cache.load_or_none().is_none());
        cache.clear().expect("clearing twice is fine");
    }

    #[test]
    fn test_corrupt_file_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(PROFILE_FILE), "{not json").expect("write");
        let cache = ProfileCache::new(dir.path().to_path_buf()).expect("cache");

        assert!(cache.load().is_err());
        assert!(cache.load_or_none().is_none());
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = ProfileCache::disabled();
        cache.save(&profile()).expect("save");
        assert!(cache.load_or_none().is_none());
    }
}
