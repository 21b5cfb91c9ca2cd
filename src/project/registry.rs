use crate::config::ProjectEntry;
use crate::project::{Project, ProjectError, ProjectRegistry, ProjectStatus};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// In-memory project registry
///
/// Seeded from configuration at startup and mutated by administrative
/// calls (`set_status`, `set_rate`). The scheduler observes changes by
/// polling [`ProjectRegistry::version`].
#[derive(Debug, Default)]
pub struct MemoryProjectRegistry {
    projects: RwLock<BTreeMap<String, Project>>,
    version: AtomicU64,
}

impl MemoryProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from configured project entries
    pub fn from_entries(entries: &[ProjectEntry]) -> Result<Self, ProjectError> {
        let registry = Self::new();
        for entry in entries {
            registry.register(
                Project::new(&entry.name, entry.rate, entry.burst).with_status(entry.status),
            )?;
        }
        Ok(registry)
    }

    /// Registers or replaces a project
    ///
    /// Rejects projects with a negative or non-finite rate or burst.
    pub fn register(&self, project: Project) -> Result<(), ProjectError> {
        project.validate()?;
        tracing::info!(
            "Registered project {} ({}, rate={}/s, burst={})",
            project.name,
            project.status,
            project.rate,
            project.burst
        );
        self.write().insert(project.name.clone(), project);
        self.bump();
        Ok(())
    }

    /// Removes a project; its tasks stop being scheduled
    pub fn remove(&self, name: &str) -> Result<Project, ProjectError> {
        let removed = self
            .write()
            .remove(name)
            .ok_or_else(|| ProjectError::NotFound(name.to_string()))?;
        self.bump();
        Ok(removed)
    }

    /// Changes the status of a project (pause, resume, stop)
    pub fn set_status(&self, name: &str, status: ProjectStatus) -> Result<(), ProjectError> {
        self.update(name, |project| {
            project.status = status;
            Ok(())
        })?;
        tracing::info!("Project {} is now {}", name, status);
        Ok(())
    }

    /// Changes the rate limit of a project
    pub fn set_rate(&self, name: &str, rate: f64, burst: f64) -> Result<(), ProjectError> {
        self.update(name, |project| {
            let candidate = Project {
                rate,
                burst,
                ..project.clone()
            };
            candidate.validate()?;
            *project = candidate;
            Ok(())
        })
    }

    fn update(
        &self,
        name: &str,
        apply: impl FnOnce(&mut Project) -> Result<(), ProjectError>,
    ) -> Result<(), ProjectError> {
        {
            let mut projects = self.write();
            let project = projects
                .get_mut(name)
                .ok_or_else(|| ProjectError::NotFound(name.to_string()))?;
            apply(project)?;
        }
        self.bump();
        Ok(())
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Project>> {
        // The map is always left consistent, so a poisoned lock is still usable
        self.projects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Project>> {
        self.projects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ProjectRegistry for MemoryProjectRegistry {
    fn list_projects(&self) -> Vec<Project> {
        self.read().values().cloned().collect()
    }

    fn get_project(&self, name: &str) -> Result<Project, ProjectError> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| ProjectError::NotFound(name.to_string()))
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registry = MemoryProjectRegistry::new();
        registry.register(Project::new("b", 1.0, 1.0)).unwrap();
        registry.register(Project::new("a", 2.0, 4.0)).unwrap();

        let names: Vec<String> = registry
            .list_projects()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        assert_eq!(registry.get_project("a").unwrap().burst, 4.0);
        assert_eq!(
            registry.get_project("missing"),
            Err(ProjectError::NotFound("missing".to_string()))
        );
    }

    #[test]
    fn test_register_rejects_negative_rate() {
        let registry = MemoryProjectRegistry::new();
        assert!(registry.register(Project::new("p", -1.0, 1.0)).is_err());
        assert!(registry.list_projects().is_empty());
        assert_eq!(registry.version(), 0);
    }

    #[test]
    fn test_updates_bump_version() {
        let registry = MemoryProjectRegistry::new();
        registry.register(Project::new("p", 1.0, 1.0)).unwrap();
        let v1 = registry.version();

        registry.set_status("p", ProjectStatus::Paused).unwrap();
        assert!(registry.version() > v1);
        assert_eq!(
            registry.get_project("p").unwrap().status,
            ProjectStatus::Paused
        );

        let v2 = registry.version();
        registry.set_rate("p", 5.0, 10.0).unwrap();
        assert!(registry.version() > v2);
        assert_eq!(registry.get_project("p").unwrap().rate, 5.0);
    }

    #[test]
    fn test_set_rate_validates_and_keeps_old_values() {
        let registry = MemoryProjectRegistry::new();
        registry.register(Project::new("p", 1.0, 1.0)).unwrap();

        assert!(registry.set_rate("p", -3.0, 1.0).is_err());
        assert_eq!(registry.get_project("p").unwrap().rate, 1.0);
        assert!(registry.set_status("nope", ProjectStatus::Running).is_err());
    }

    #[test]
    fn test_remove() {
        let registry = MemoryProjectRegistry::new();
        registry.register(Project::new("p", 1.0, 1.0)).unwrap();
        assert!(registry.remove("p").is_ok());
        assert!(registry.remove("p").is_err());
    }
}
