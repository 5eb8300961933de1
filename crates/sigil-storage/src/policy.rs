//! Scope policy: precedence orders, write permissions and file locations
//!
//! File layout per provider:
//!
//! ```text
//! <user root>/<provider>/settings.ini
//! <user root>/<provider>/settings-local-<host>.ini
//! <project root>/.sigil/<provider>/settings.ini
//! <project root>/.sigil/<provider>/settings-local-<host>.ini
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{StorageError, StorageResult};
use crate::provider_id::ProviderId;
use crate::types::{ConfigFormat, ScopeId};

/// Overrides the user configuration root
pub const CONFIG_HOME_ENV: &str = "SIGIL_CONFIG_HOME";

/// Overrides project root discovery
pub const PROJECT_ROOT_ENV: &str = "SIGIL_ROOT";

/// Directory holding project-scope settings under the project root
pub const PROJECT_DIR: &str = ".sigil";

/// Default settings file name
pub const DEFAULT_SETTINGS_FILE: &str = "settings.ini";

/// Key holding the active precedence order
pub const POLICY_ORDER_KEY: &str = "policy.order";

/// Which of project or user settings is consulted first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrecedenceOrder {
    #[default]
    ProjectOverUser,
    UserOverProject,
}

impl PrecedenceOrder {
    /// Name used in settings files
    pub fn as_str(&self) -> &'static str {
        match self {
            PrecedenceOrder::ProjectOverUser => "project_over_user",
            PrecedenceOrder::UserOverProject => "user_over_project",
        }
    }
}

impl fmt::Display for PrecedenceOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrecedenceOrder {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "project_over_user" => Ok(PrecedenceOrder::ProjectOverUser),
            "user_over_project" => Ok(PrecedenceOrder::UserOverProject),
            other => Err(StorageError::validation_error(
                POLICY_ORDER_KEY,
                format!(
                    "expected project_over_user or user_over_project, got '{}'",
                    other
                ),
            )),
        }
    }
}

const PROJECT_OVER_USER: [ScopeId; 8] = [
    ScopeId::Secret,
    ScopeId::Environment,
    ScopeId::ProjectLocal,
    ScopeId::Project,
    ScopeId::UserLocal,
    ScopeId::User,
    ScopeId::Default,
    ScopeId::Core,
];

const USER_OVER_PROJECT: [ScopeId; 8] = [
    ScopeId::Secret,
    ScopeId::Environment,
    ScopeId::UserLocal,
    ScopeId::User,
    ScopeId::ProjectLocal,
    ScopeId::Project,
    ScopeId::Default,
    ScopeId::Core,
];

/// Where settings files live on this machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeLayout {
    user_root: PathBuf,
    project_root: Option<PathBuf>,
    host: String,
    settings_file: String,
}

impl ScopeLayout {
    /// Layout rooted at `user_root` with no project
    pub fn new(user_root: impl Into<PathBuf>) -> Self {
        Self {
            user_root: user_root.into(),
            project_root: None,
            host: host_id(),
            settings_file: DEFAULT_SETTINGS_FILE.to_string(),
        }
    }

    /// Layout from the environment
    ///
    /// User root: `SIGIL_CONFIG_HOME`, else `<config dir>/sigil`.
    /// Project root: `SIGIL_ROOT`, else the nearest ancestor of the current
    /// directory containing `.sigil` or `.git`.
    pub fn from_env() -> StorageResult<Self> {
        let user_root = match std::env::var(CONFIG_HOME_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => dirs::config_dir()
                .map(|dir| dir.join("sigil"))
                .ok_or_else(|| {
                    StorageError::path_resolution_error(
                        "Could not determine the user configuration directory",
                    )
                })?,
        };

        let project_root = match std::env::var(PROJECT_ROOT_ENV) {
            Ok(path) if !path.is_empty() => Some(PathBuf::from(path)),
            _ => std::env::current_dir()
                .ok()
                .and_then(|cwd| find_project_root(&cwd)),
        };

        Ok(Self {
            project_root,
            ..Self::new(user_root)
        })
    }

    /// Set the project root
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    /// Set the host id used for machine-local files
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the settings file name; its extension selects the backend
    pub fn with_settings_file(mut self, name: impl Into<String>) -> Self {
        self.settings_file = name.into();
        self
    }

    /// User configuration root
    pub fn user_root(&self) -> &Path {
        &self.user_root
    }

    /// Project root, if any
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Host id
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Shared settings file name
    pub fn settings_file(&self) -> &str {
        &self.settings_file
    }

    /// Machine-local settings file name, `settings-local-<host>.<ext>`
    pub fn local_settings_file(&self) -> String {
        let path = Path::new(&self.settings_file);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("settings");
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}-local-{}.{}", stem, self.host, ext),
            None => format!("{}-local-{}", stem, self.host),
        }
    }

    /// Format of the settings files
    pub fn format(&self) -> Option<ConfigFormat> {
        ConfigFormat::from_extension(Path::new(&self.settings_file))
    }

    /// Directory holding a provider's user settings
    pub fn user_dir(&self, provider: &ProviderId) -> PathBuf {
        self.user_root.join(provider.as_str())
    }

    /// Directory holding a provider's project settings
    pub fn project_dir(&self, provider: &ProviderId) -> Option<PathBuf> {
        self.project_root
            .as_ref()
            .map(|root| root.join(PROJECT_DIR).join(provider.as_str()))
    }
}

/// Read precedence and write permissions for one provider's scopes
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    layout: ScopeLayout,
    defaults_file: Option<PathBuf>,
    default_writable: bool,
}

impl ScopePolicy {
    /// Policy over a layout; package defaults are read-only
    pub fn new(layout: ScopeLayout) -> Self {
        Self {
            layout,
            defaults_file: None,
            default_writable: false,
        }
    }

    /// Copy of this policy reading package defaults from `path`
    pub fn with_defaults_file(&self, path: impl Into<PathBuf>, writable: bool) -> Self {
        Self {
            layout: self.layout.clone(),
            defaults_file: Some(path.into()),
            default_writable: writable,
        }
    }

    /// Underlying layout
    pub fn layout(&self) -> &ScopeLayout {
        &self.layout
    }

    /// Package defaults file, if any
    pub fn defaults_file(&self) -> Option<&Path> {
        self.defaults_file.as_deref()
    }

    /// Every known scope
    pub fn scopes(&self) -> &'static [ScopeId] {
        &ScopeId::ALL
    }

    /// Scopes from highest to lowest precedence
    pub fn precedence(&self, order: PrecedenceOrder) -> &'static [ScopeId] {
        match order {
            PrecedenceOrder::ProjectOverUser => &PROJECT_OVER_USER,
            PrecedenceOrder::UserOverProject => &USER_OVER_PROJECT,
        }
    }

    /// Whether writes to `scope` are permitted
    pub fn allows(&self, scope: ScopeId) -> bool {
        match scope {
            ScopeId::Core => false,
            ScopeId::Default => self.default_writable && self.defaults_file.is_some(),
            _ => true,
        }
    }

    /// File to write for `scope`
    ///
    /// Fails for read-only scopes, for scopes without a backing file and for
    /// project scopes when no project root is known.
    pub fn path_for(&self, scope: ScopeId, provider: &ProviderId) -> StorageResult<PathBuf> {
        if !self.allows(scope) {
            return Err(StorageError::read_only(
                scope,
                match scope {
                    ScopeId::Core => "engine defaults cannot be modified",
                    _ => "package defaults are not linked for editing",
                },
            ));
        }
        if !scope.is_file_backed() {
            return Err(StorageError::read_only(scope, "scope has no settings file"));
        }
        self.locate(scope, provider)?
            .ok_or(StorageError::ProjectRootNotFound { scope })
    }

    /// File to read for `scope`, `None` when the scope has no file here
    pub fn locate(&self, scope: ScopeId, provider: &ProviderId) -> StorageResult<Option<PathBuf>> {
        let path = match scope {
            ScopeId::Default => self.defaults_file.clone(),
            ScopeId::User => Some(self.layout.user_dir(provider).join(&self.layout.settings_file)),
            ScopeId::UserLocal => Some(
                self.layout
                    .user_dir(provider)
                    .join(self.layout.local_settings_file()),
            ),
            ScopeId::Project => self
                .layout
                .project_dir(provider)
                .map(|dir| dir.join(&self.layout.settings_file)),
            ScopeId::ProjectLocal => self
                .layout
                .project_dir(provider)
                .map(|dir| dir.join(self.layout.local_settings_file())),
            ScopeId::Core | ScopeId::Environment | ScopeId::Secret => None,
        };
        Ok(path)
    }
}

/// Nearest ancestor of `start` containing `.sigil` or `.git`
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(PROJECT_DIR).is_dir() || dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Normalized host name used in machine-local file names
pub fn host_id() -> String {
    let raw = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default();
    let short = raw.split('.').next().unwrap_or_default();
    let normalized: String = short
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let normalized = normalized.trim_matches('-').to_string();
    if normalized.is_empty() {
        "localhost".to_string()
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pid(name: &str) -> ProviderId {
        ProviderId::normalize(name).unwrap()
    }

    #[test]
    fn test_precedence_orders() {
        let policy = ScopePolicy::new(ScopeLayout::new("/tmp/u"));
        let p = policy.precedence(PrecedenceOrder::ProjectOverUser);
        let u = policy.precedence(PrecedenceOrder::UserOverProject);

        assert_eq!(&p[..2], &[ScopeId::Secret, ScopeId::Environment]);
        assert_eq!(&u[..2], &[ScopeId::Secret, ScopeId::Environment]);
        assert_eq!(&p[6..], &[ScopeId::Default, ScopeId::Core]);
        assert_eq!(&u[6..], &[ScopeId::Default, ScopeId::Core]);
        assert_eq!(&p[2..6], &[ScopeId::ProjectLocal, ScopeId::Project, ScopeId::UserLocal, ScopeId::User]);
        assert_eq!(&u[2..6], &[ScopeId::UserLocal, ScopeId::User, ScopeId::ProjectLocal, ScopeId::Project]);
    }

    #[test]
    fn test_order_parsing() {
        assert_eq!(
            "user_over_project".parse::<PrecedenceOrder>().unwrap(),
            PrecedenceOrder::UserOverProject
        );
        assert_eq!(
            "Project-Over-User".parse::<PrecedenceOrder>().unwrap(),
            PrecedenceOrder::ProjectOverUser
        );
        assert!("sideways".parse::<PrecedenceOrder>().is_err());
    }

    #[test]
    fn test_paths() {
        let layout = ScopeLayout::new("/cfg")
            .with_project_root("/work/repo")
            .with_host("box");
        let policy = ScopePolicy::new(layout);
        let demo = pid("demo");

        assert_eq!(
            policy.path_for(ScopeId::User, &demo).unwrap(),
            PathBuf::from("/cfg/demo/settings.ini")
        );
        assert_eq!(
            policy.path_for(ScopeId::UserLocal, &demo).unwrap(),
            PathBuf::from("/cfg/demo/settings-local-box.ini")
        );
        assert_eq!(
            policy.path_for(ScopeId::Project, &demo).unwrap(),
            PathBuf::from("/work/repo/.sigil/demo/settings.ini")
        );
        assert_eq!(
            policy.path_for(ScopeId::ProjectLocal, &demo).unwrap(),
            PathBuf::from("/work/repo/.sigil/demo/settings-local-box.ini")
        );
    }

    #[test]
    fn test_read_only_scopes() {
        let policy = ScopePolicy::new(ScopeLayout::new("/cfg"));
        let demo = pid("demo");

        assert!(!policy.allows(ScopeId::Core));
        assert!(!policy.allows(ScopeId::Default));
        assert!(matches!(
            policy.path_for(ScopeId::Core, &demo),
            Err(StorageError::ReadOnlyScope { .. })
        ));
        assert!(matches!(
            policy.path_for(ScopeId::Default, &demo),
            Err(StorageError::ReadOnlyScope { .. })
        ));
        assert!(matches!(
            policy.path_for(ScopeId::Environment, &demo),
            Err(StorageError::ReadOnlyScope { .. })
        ));
    }

    #[test]
    fn test_project_scope_without_root() {
        let policy = ScopePolicy::new(ScopeLayout::new("/cfg"));
        assert!(matches!(
            policy.path_for(ScopeId::Project, &pid("demo")),
            Err(StorageError::ProjectRootNotFound { .. })
        ));
        assert_eq!(policy.locate(ScopeId::Project, &pid("demo")).unwrap(), None);
    }

    #[test]
    fn test_writable_defaults() {
        let policy = ScopePolicy::new(ScopeLayout::new("/cfg"))
            .with_defaults_file("/src/pkg/defaults.ini", true);
        assert!(policy.allows(ScopeId::Default));
        assert_eq!(
            policy.path_for(ScopeId::Default, &pid("pkg")).unwrap(),
            PathBuf::from("/src/pkg/defaults.ini")
        );

        let read_only = policy.with_defaults_file("/src/pkg/defaults.ini", false);
        assert!(!read_only.allows(ScopeId::Default));
    }

    #[test]
    fn test_local_file_name_follows_extension() {
        let layout = ScopeLayout::new("/cfg")
            .with_host("box")
            .with_settings_file("settings.yaml");
        assert_eq!(layout.local_settings_file(), "settings-local-box.yaml");
        assert_eq!(layout.format(), Some(ConfigFormat::Yaml));
    }

    #[test]
    fn test_find_project_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("repo");
        let nested = root.join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(root.join(PROJECT_DIR)).unwrap();

        assert_eq!(find_project_root(&nested), Some(root));
    }

    #[test]
    fn test_host_id_is_normalized() {
        let host = host_id();
        assert!(!host.is_empty());
        assert!(host
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }
}
