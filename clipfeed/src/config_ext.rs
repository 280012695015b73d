//! Extension pour intégrer le moteur de feed dans clipconfig
//!
//! `FeedConfigExt` adds feed-specific accessors to [`clipconfig::Config`].
//!
//! ```rust,ignore
//! use clipconfig::get_config;
//! use clipfeed::FeedConfigExt;
//!
//! let config = get_config();
//! let db = config.get_selection_database()?;
//! ```

use anyhow::Result;
use clipconfig::Config;
use serde_yaml::Value;
use std::path::Path;

/// Chemin par défaut de la base du pool de sélection (relatif au config_dir)
const DEFAULT_SELECTION_DATABASE: &str = "selection_pool.db";

pub trait FeedConfigExt {
    /// Absolute path of the selection pool SQLite database
    /// (default: `<state_dir>/selection_pool.db`).
    fn get_selection_database(&self) -> Result<String>;

    /// Sets the database path, absolute or relative to the state directory.
    fn set_selection_database(&self, path: String) -> Result<()>;

    /// Typed `feed` block of this configuration.
    fn feed_config(&self) -> crate::config::FeedConfig;
}

impl FeedConfigExt for Config {
    fn get_selection_database(&self) -> Result<String> {
        let database = match self.get_value(&["feed", "selection", "database"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => DEFAULT_SELECTION_DATABASE.to_string(),
        };
        if Path::new(&database).is_absolute() {
            return Ok(database);
        }
        // Le fichier vit dans le répertoire d'état géré
        let state_dir = self.get_state_dir()?;
        Ok(Path::new(&state_dir)
            .join(database)
            .to_string_lossy()
            .to_string())
    }

    fn set_selection_database(&self, path: String) -> Result<()> {
        self.set_value(&["feed", "selection", "database"], Value::String(path))
    }

    fn feed_config(&self) -> crate::config::FeedConfig {
        self.get_value(&["feed"])
            .ok()
            .and_then(|value| serde_yaml::from_value(value).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_database_under_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();

        let db = config.get_selection_database().unwrap();
        assert!(db.starts_with(dir.path().to_str().unwrap()));
        assert!(db.ends_with(DEFAULT_SELECTION_DATABASE));
        assert!(!Path::new(&db).exists());

        config
            .set_selection_database("/tmp/elsewhere.db".to_string())
            .unwrap();
        assert_eq!(config.get_selection_database().unwrap(), "/tmp/elsewhere.db");

        let feed = config.feed_config();
        assert_eq!(feed.cache.capacity, config.get_cache_capacity().unwrap());
    }
}
