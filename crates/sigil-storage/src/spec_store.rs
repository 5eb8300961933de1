//! Provider specification store
//!
//! Each provider's [`ProviderSpec`] is persisted as an INI document:
//!
//! ```ini
//! [package]
//! provider_id = demo
//! schema_version = 0
//! title = Demo
//!
//! [field:db.host]
//! type = string
//! label = Database host
//! options = {"choices":["a","b"]}
//! ```
//!
//! Every read hands out an [`EntryTag`] and every successful write issues a
//! fresh one. Tags are random, so even a save that changes nothing invalidates
//! tags held by other callers. The store also fingerprints the file it last
//! read or wrote and refuses to save over a file that was edited externally
//! in the meantime.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use crate::adapters::FieldOptions;
use crate::backends::{read_to_string, IniDocument};
use crate::error::{IoOperation, StorageError, StorageResult};
use crate::keys::KeyPath;
use crate::links::DevLinks;
use crate::provider_id::ProviderId;
use crate::spec::{FieldSpec, ProviderSpec};

/// Specification file name
pub const SPEC_FILE: &str = "metadata.ini";

const PACKAGE_SECTION: &str = "package";
const FIELD_SECTION_PREFIX: &str = "field:";

/// Optimistic-concurrency token for one provider's specification
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryTag(String);

impl EntryTag {
    fn fresh() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistence contract for provider specifications
pub trait SpecStore: Send + Sync {
    /// Providers with a specification on disk or a development link
    fn provider_ids(&self) -> StorageResult<Vec<ProviderId>>;

    /// Read a specification together with the tag of the content read
    fn read_spec(&self, provider: &ProviderId) -> StorageResult<(ProviderSpec, EntryTag)>;

    /// Read a specification
    fn get_spec(&self, provider: &ProviderId) -> StorageResult<ProviderSpec> {
        Ok(self.read_spec(provider)?.0)
    }

    /// Persist a new specification; fails if one exists
    fn create_spec(&self, spec: &ProviderSpec) -> StorageResult<EntryTag>;

    /// Replace a specification
    ///
    /// When `expected` is given it must equal the current tag. The save also
    /// fails if the file changed on disk since this store last read it.
    fn save_spec(&self, spec: &ProviderSpec, expected: Option<&EntryTag>) -> StorageResult<EntryTag>;

    /// Remove a specification file
    fn delete_spec(&self, provider: &ProviderId) -> StorageResult<()>;

    /// Current tag for a stored specification
    fn etag(&self, provider: &ProviderId) -> StorageResult<EntryTag>;

    /// File holding a provider's specification
    fn spec_path(&self, provider: &ProviderId) -> PathBuf;
}

#[derive(Debug, Clone)]
struct TagState {
    tag: EntryTag,
    fingerprint: [u8; 32],
}

/// INI-file specification store rooted at the user configuration directory
pub struct IniSpecStore {
    root: PathBuf,
    links: Arc<DevLinks>,
    tags: Mutex<HashMap<ProviderId, TagState>>,
}

impl IniSpecStore {
    /// Create a store; specs live at `<root>/<provider>/metadata.ini` unless
    /// the provider is linked for development
    pub fn new(root: impl Into<PathBuf>, links: Arc<DevLinks>) -> Self {
        Self {
            root: root.into(),
            links,
            tags: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Development links consulted for spec locations
    pub fn links(&self) -> &Arc<DevLinks> {
        &self.links
    }

    fn read_file(&self, provider: &ProviderId) -> StorageResult<Option<(PathBuf, String)>> {
        let path = self.spec_path(provider);
        Ok(read_to_string(&path)?.map(|text| (path, text)))
    }

    /// Tag for content with `fingerprint`, reissued if the content moved
    fn observe(
        tags: &mut HashMap<ProviderId, TagState>,
        provider: &ProviderId,
        fingerprint: [u8; 32],
    ) -> EntryTag {
        match tags.get(provider) {
            Some(state) if state.fingerprint == fingerprint => state.tag.clone(),
            _ => {
                let tag = EntryTag::fresh();
                tags.insert(
                    provider.clone(),
                    TagState {
                        tag: tag.clone(),
                        fingerprint,
                    },
                );
                tag
            }
        }
    }

    fn write(&self, spec: &ProviderSpec) -> StorageResult<[u8; 32]> {
        let path = self.spec_path(&spec.provider_id);
        let text = render_spec(spec);
        sigil_common::write_atomic(&path, text.as_bytes())
            .map_err(|e| StorageError::io_error(&path, IoOperation::Write, e))?;
        Ok(fingerprint(text.as_bytes()))
    }
}

impl SpecStore for IniSpecStore {
    fn provider_ids(&self) -> StorageResult<Vec<ProviderId>> {
        let mut ids = BTreeSet::new();

        match std::fs::read_dir(&self.root) {
            Ok(entries) => {
                for entry in entries {
                    let entry =
                        entry.map_err(|e| StorageError::io_error(&self.root, IoOperation::Read, e))?;
                    if !entry.path().join(SPEC_FILE).is_file() {
                        continue;
                    }
                    let name = entry.file_name();
                    match name.to_str().map(ProviderId::normalize) {
                        Some(Ok(id)) => {
                            ids.insert(id);
                        }
                        _ => debug!(dir = ?name, "Skipping directory with unusable provider name"),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io_error(&self.root, IoOperation::Read, e)),
        }

        ids.extend(self.links.all().into_iter().map(|(id, _)| id));
        Ok(ids.into_iter().collect())
    }

    fn read_spec(&self, provider: &ProviderId) -> StorageResult<(ProviderSpec, EntryTag)> {
        let (path, text) = self
            .read_file(provider)?
            .ok_or_else(|| StorageError::unknown_provider(provider))?;
        let spec = parse_spec(&text, &path, provider)?;
        let tag = Self::observe(&mut self.tags.lock(), provider, fingerprint(text.as_bytes()));
        Ok((spec, tag))
    }

    fn create_spec(&self, spec: &ProviderSpec) -> StorageResult<EntryTag> {
        let mut tags = self.tags.lock();
        let path = self.spec_path(&spec.provider_id);
        if path.exists() {
            return Err(StorageError::DuplicateProvider {
                provider: spec.provider_id.to_string(),
            });
        }

        let fingerprint = self.write(spec)?;
        let tag = EntryTag::fresh();
        tags.insert(
            spec.provider_id.clone(),
            TagState {
                tag: tag.clone(),
                fingerprint,
            },
        );
        info!(provider = %spec.provider_id, path = %path.display(), "Created provider specification");
        Ok(tag)
    }

    fn save_spec(&self, spec: &ProviderSpec, expected: Option<&EntryTag>) -> StorageResult<EntryTag> {
        let provider = &spec.provider_id;
        let mut tags = self.tags.lock();

        let on_disk = match self.read_file(provider)? {
            Some((_, text)) => fingerprint(text.as_bytes()),
            None => {
                tags.remove(provider);
                return Err(StorageError::unknown_provider(provider));
            }
        };

        match tags.get(provider) {
            Some(state) if state.fingerprint != on_disk => {
                return Err(StorageError::conflict(
                    provider,
                    "specification file was modified externally since it was last read",
                ));
            }
            Some(state) => {
                if let Some(expected) = expected {
                    if expected != &state.tag {
                        return Err(StorageError::conflict(
                            provider,
                            format!("stale entry tag {}", expected),
                        ));
                    }
                }
            }
            None => {
                if let Some(expected) = expected {
                    return Err(StorageError::conflict(
                        provider,
                        format!("entry tag {} was not issued for the current file", expected),
                    ));
                }
            }
        }

        let fingerprint = self.write(spec)?;
        let tag = EntryTag::fresh();
        tags.insert(
            provider.clone(),
            TagState {
                tag: tag.clone(),
                fingerprint,
            },
        );
        debug!(provider = %provider, fields = spec.fields().len(), "Saved provider specification");
        Ok(tag)
    }

    fn delete_spec(&self, provider: &ProviderId) -> StorageResult<()> {
        let mut tags = self.tags.lock();
        let path = self.spec_path(provider);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::unknown_provider(provider));
            }
            Err(e) => return Err(StorageError::io_error(&path, IoOperation::Delete, e)),
        }
        tags.remove(provider);
        info!(provider = %provider, "Deleted provider specification");
        Ok(())
    }

    fn etag(&self, provider: &ProviderId) -> StorageResult<EntryTag> {
        let (_, text) = self
            .read_file(provider)?
            .ok_or_else(|| StorageError::unknown_provider(provider))?;
        Ok(Self::observe(
            &mut self.tags.lock(),
            provider,
            fingerprint(text.as_bytes()),
        ))
    }

    fn spec_path(&self, provider: &ProviderId) -> PathBuf {
        match self.links.get(provider) {
            Some(defaults) => defaults
                .parent()
                .map(|dir| dir.join(SPEC_FILE))
                .unwrap_or_else(|| PathBuf::from(SPEC_FILE)),
            None => self.root.join(provider.as_str()).join(SPEC_FILE),
        }
    }
}

fn fingerprint(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Render a specification document
pub fn render_spec(spec: &ProviderSpec) -> String {
    let mut doc = IniDocument::new();
    doc.set(PACKAGE_SECTION, "provider_id", spec.provider_id.as_str());
    doc.set(PACKAGE_SECTION, "schema_version", spec.schema_version.as_str());
    if let Some(title) = &spec.title {
        doc.set(PACKAGE_SECTION, "title", title.as_str());
    }
    if let Some(description) = &spec.description {
        doc.set(PACKAGE_SECTION, "description", description.as_str());
    }

    for field in spec.fields() {
        let section = format!("{}{}", FIELD_SECTION_PREFIX, field.key.dotted());
        doc.set(&section, "type", field.type_name.as_str());
        if let Some(label) = &field.label {
            doc.set(&section, "label", label.as_str());
        }
        if let Some(description) = &field.description {
            doc.set(&section, "description", description.as_str());
        }
        if !field.options.is_empty() {
            // BTreeMap<String, Value> always serializes
            let options = serde_json::to_string(&field.options).unwrap_or_default();
            doc.set(&section, "options", options);
        }
    }
    doc.render()
}

/// Parse a specification document; `provider` is used when the package
/// section does not name one
pub fn parse_spec(text: &str, path: &Path, provider: &ProviderId) -> StorageResult<ProviderSpec> {
    let doc = IniDocument::parse(text, path)?;
    let bad = |message: String| StorageError::parse_error(path, "specification", message);

    let package = doc.section(PACKAGE_SECTION);
    if let Some(raw) = package.and_then(|s| s.get("provider_id")) {
        let declared = ProviderId::normalize(raw)?;
        if &declared != provider {
            return Err(bad(format!(
                "file declares provider '{}' but belongs to '{}'",
                declared, provider
            )));
        }
    }
    let provider_id = provider.clone();

    let mut fields = Vec::new();
    for section in doc.sections() {
        let raw_key = match section.name.strip_prefix(FIELD_SECTION_PREFIX) {
            Some(raw_key) => raw_key,
            None => continue,
        };
        let key = KeyPath::parse(raw_key).map_err(|e| bad(e.to_string()))?;
        let type_name = section
            .get("type")
            .ok_or_else(|| bad(format!("field '{}' has no type", raw_key)))?
            .parse()?;
        let options: FieldOptions = match section.get("options") {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| bad(format!("field '{}' options: {}", raw_key, e)))?,
            None => FieldOptions::new(),
        };
        let mut field = FieldSpec::new(key, type_name).with_options(options);
        field.label = section.get("label").map(str::to_string);
        field.description = section.get("description").map(str::to_string);
        fields.push(field);
    }

    let mut spec = ProviderSpec::new(provider_id).with_fields(fields)?;
    if let Some(package) = package {
        if let Some(version) = package.get("schema_version") {
            spec.schema_version = version.to_string();
        }
        spec.title = package.get("title").map(str::to_string);
        spec.description = package.get("description").map(str::to_string);
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn pid(name: &str) -> ProviderId {
        ProviderId::normalize(name).unwrap()
    }

    fn store(root: &Path) -> IniSpecStore {
        IniSpecStore::new(root, Arc::new(DevLinks::load(root).unwrap()))
    }

    fn demo_spec() -> ProviderSpec {
        ProviderSpec::new(pid("demo"))
            .with_title("Demo")
            .with_fields(vec![
                FieldSpec::parse("retries", "integer")
                    .unwrap()
                    .with_label("Retries")
                    .with_option("minimum", json!(0)),
                FieldSpec::parse("db.host", "string")
                    .unwrap()
                    .with_description("  padded  "),
            ])
            .unwrap()
    }

    #[test]
    fn test_render_parse() {
        let spec = demo_spec();
        let text = render_spec(&spec);
        assert!(text.contains("[package]"));
        assert!(text.contains("[field:db.host]"));
        assert!(text.contains("options = {\"minimum\":0}"));

        let parsed = parse_spec(&text, Path::new("mem"), &pid("demo")).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn test_missing_type_is_parse_error() {
        let text = "[package]\nschema_version = 0\n\n[field:a]\nlabel = A\n";
        assert!(matches!(
            parse_spec(text, Path::new("mem"), &pid("demo")),
            Err(StorageError::ParseError { .. })
        ));
    }

    #[test]
    fn test_foreign_provider_id_rejected() {
        let text = "[package]\nprovider_id = other\n\n[field:a]\ntype = string\n";
        assert!(matches!(
            parse_spec(text, Path::new("mem"), &pid("demo")),
            Err(StorageError::ParseError { .. })
        ));

        // Spelling differences normalize to the same provider
        let text = "[package]\nprovider_id = Demo_App\n";
        let spec = parse_spec(text, Path::new("mem"), &pid("demo-app")).unwrap();
        assert_eq!(spec.provider_id, pid("demo-app"));
    }

    #[test]
    fn test_copied_spec_file_is_not_loaded() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.create_spec(&demo_spec()).unwrap();

        let copy = dir.path().join("other").join(SPEC_FILE);
        std::fs::create_dir_all(copy.parent().unwrap()).unwrap();
        std::fs::copy(store.spec_path(&pid("demo")), &copy).unwrap();

        assert!(matches!(
            store.get_spec(&pid("other")),
            Err(StorageError::ParseError { .. })
        ));
        assert_eq!(store.get_spec(&pid("demo")).unwrap(), demo_spec());
    }

    #[test]
    fn test_create_get_delete() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let spec = demo_spec();

        store.create_spec(&spec).unwrap();
        assert!(matches!(
            store.create_spec(&spec),
            Err(StorageError::DuplicateProvider { .. })
        ));
        assert_eq!(store.get_spec(&pid("demo")).unwrap(), spec);
        assert_eq!(store.provider_ids().unwrap(), vec![pid("demo")]);

        store.delete_spec(&pid("demo")).unwrap();
        assert!(matches!(
            store.get_spec(&pid("demo")),
            Err(StorageError::UnknownProvider { .. })
        ));
        assert!(matches!(
            store.delete_spec(&pid("demo")),
            Err(StorageError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn test_stale_tag_conflicts() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let spec = demo_spec();

        let first = store.create_spec(&spec).unwrap();
        let second = store.save_spec(&spec, Some(&first)).unwrap();
        assert_ne!(first, second);

        assert!(matches!(
            store.save_spec(&spec, Some(&first)),
            Err(StorageError::Conflict { .. })
        ));
        let third = store.save_spec(&spec, Some(&second)).unwrap();
        assert_eq!(store.etag(&pid("demo")).unwrap(), third);
    }

    #[test]
    fn test_reads_keep_tag_until_file_changes() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.create_spec(&demo_spec()).unwrap();

        let a = store.etag(&pid("demo")).unwrap();
        store.get_spec(&pid("demo")).unwrap();
        assert_eq!(store.etag(&pid("demo")).unwrap(), a);
    }

    #[test]
    fn test_external_edit_conflicts() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let spec = demo_spec();
        let tag = store.create_spec(&spec).unwrap();

        let path = store.spec_path(&pid("demo"));
        let edited = std::fs::read_to_string(&path).unwrap() + "\n[field:extra]\ntype = string\n";
        std::fs::write(&path, edited).unwrap();

        assert!(matches!(
            store.save_spec(&spec, Some(&tag)),
            Err(StorageError::Conflict { .. })
        ));
        assert!(matches!(
            store.save_spec(&spec, None),
            Err(StorageError::Conflict { .. })
        ));

        // Re-reading picks up the edit and a new tag
        let reread = store.get_spec(&pid("demo")).unwrap();
        assert_eq!(reread.fields().len(), 3);
        let fresh = store.etag(&pid("demo")).unwrap();
        assert_ne!(fresh, tag);
        store.save_spec(&reread, Some(&fresh)).unwrap();
    }

    #[test]
    fn test_second_store_sees_conflict() {
        let dir = tempdir().unwrap();
        let a = store(dir.path());
        let b = store(dir.path());
        let spec = demo_spec();
        a.create_spec(&spec).unwrap();

        let tag_b = b.etag(&pid("demo")).unwrap();
        a.save_spec(&spec.clone().with_title("Changed"), None).unwrap();

        assert!(matches!(
            b.save_spec(&spec, Some(&tag_b)),
            Err(StorageError::Conflict { .. })
        ));
    }

    #[test]
    fn test_linked_spec_lives_next_to_defaults() {
        let dir = tempdir().unwrap();
        let links = Arc::new(DevLinks::load(dir.path()).unwrap());
        let pkg_dir = dir.path().join("src").join("pkg");
        links.link(&pid("pkg"), pkg_dir.join("defaults.ini")).unwrap();

        let store = IniSpecStore::new(dir.path(), links);
        assert_eq!(store.spec_path(&pid("pkg")), pkg_dir.join(SPEC_FILE));
        assert_eq!(store.provider_ids().unwrap(), vec![pid("pkg")]);

        store.create_spec(&ProviderSpec::new(pid("pkg"))).unwrap();
        assert!(pkg_dir.join(SPEC_FILE).is_file());
    }
}
