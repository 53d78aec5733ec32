//! Test persona fixtures (`fixtures/users/<persona>.json`)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A test persona
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFixture {
    pub firstname: String,
    pub lastname: String,
    pub password: String,
    pub email: String,
    pub role: String,
}

impl UserFixture {
    /// Account name derived from the persona's names
    pub fn username(&self) -> String {
        format!("{}{}", self.firstname, self.lastname)
    }
}

/// Loads persona fixtures from a fixtures directory
#[derive(Debug, Clone)]
pub struct FixtureStore {
    root: PathBuf,
}

impl FixtureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load `users/<key>.json`
    pub fn user(&self, key: &str) -> Result<UserFixture> {
        if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
            return Err(Error::FixtureNotFound(key.to_string()));
        }

        let path = self.root.join("users").join(format!("{}.json", key));
        if !path.exists() {
            return Err(Error::FixtureNotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
