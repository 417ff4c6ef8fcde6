//! Source registry
//!
//! Maps source names to site models, loaded once at startup from a
//! directory of TOML configuration files. Run requests select sources by
//! name through the registry instead of dispatching on raw strings.

use crate::config::{load_site_config, source_name};
use crate::site::SiteModel;
use crate::ConfigError;
use std::collections::HashMap;
use std::path::Path;

/// Registry of configured sources, keyed by source name
#[derive(Debug, Default)]
pub struct SiteRegistry {
    sources: HashMap<String, SiteModel>,
}

impl SiteRegistry {
    /// Loads every `.toml` file under the given directory, recursively
    ///
    /// The file stem becomes the source name. A file that fails to parse or
    /// validate fails the whole load; a misconfigured source should never
    /// silently vanish from the registry.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory containing site configuration files
    ///
    /// # Returns
    ///
    /// * `Ok(SiteRegistry)` - All configurations loaded
    /// * `Err(ConfigError)` - A file could not be read, parsed, or validated
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let mut sources = HashMap::new();
        collect_sources(dir, &mut sources)?;
        tracing::info!("Loaded {} source(s) from {}", sources.len(), dir.display());
        Ok(SiteRegistry { sources })
    }

    /// Looks up a source by name
    pub fn get(&self, name: &str) -> Result<&SiteModel, ConfigError> {
        self.sources
            .get(name)
            .ok_or_else(|| ConfigError::UnknownSource(name.to_string()))
    }

    /// Returns the registered source names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

fn collect_sources(
    dir: &Path,
    sources: &mut HashMap<String, SiteModel>,
) -> Result<(), ConfigError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            collect_sources(&path, sources)?;
            continue;
        }

        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        if !is_toml {
            continue;
        }

        let name = match source_name(&path) {
            Some(name) => name,
            None => continue,
        };

        tracing::debug!("Loading source {} from {}", name, path.display());
        let config = load_site_config(&path)?;
        let model = SiteModel::new(&name, config)?;
        sources.insert(name, model);
    }

    Ok(())
}
