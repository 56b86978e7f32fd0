use parking_lot::RwLock;
use std::collections::HashMap;

/// Maps a record's owning project URI to the identifier the server knows the
/// project by.
///
/// Returning `None` means the identifier is not available yet; the record is
/// left unsent and handed back to the caller for a later attempt.
pub trait ProjectResolver: Send + Sync {
    fn resolve(&self, project_uri: &str) -> Option<String>;
}

/// Resolves every project URI to itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResolver;

impl ProjectResolver for PassthroughResolver {
    fn resolve(&self, project_uri: &str) -> Option<String> {
        Some(project_uri.to_string())
    }
}

/// Resolver backed by a table that event sources fill in as projects become
/// known to the server.
#[derive(Debug, Default)]
pub struct StaticResolver {
    projects: RwLock<HashMap<String, String>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, project_uri: impl Into<String>, project_id: impl Into<String>) {
        self.projects
            .write()
            .insert(project_uri.into(), project_id.into());
    }

    pub fn forget(&self, project_uri: &str) {
        self.projects.write().remove(project_uri);
    }
}

impl ProjectResolver for StaticResolver {
    fn resolve(&self, project_uri: &str) -> Option<String> {
        self.projects.read().get(project_uri).cloned()
    }
}
