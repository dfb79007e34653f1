//! Template discovery, merge, and TTL-cached resolution.
//!
//! A search path, a priority-merge step across multiple file naming
//! conventions, and an `Arc<tokio::sync::Mutex<..>>`-guarded single-flight
//! refresh so concurrent resolvers never race to reload the same path.

use brk_domain::BrokerError;
use brk_proto::{Template, TemplateId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// File-pattern priority (lower wins on collision). The single-file
/// `{provider}_templates.json` form is legacy and only considered when
/// `TemplateSection::legacy_single_file` is set — see the discovery walk.
const PRIORITY_INSTANCE: u8 = 1;
const PRIORITY_TYPE: u8 = 2;
const PRIORITY_MAIN: u8 = 3;
const PRIORITY_LEGACY: u8 = 4;

#[derive(Debug, Clone)]
pub struct TemplateSection {
    pub search_paths: Vec<PathBuf>,
    pub cache_ttl: Duration,
    pub legacy_single_file: bool,
}

impl Default for TemplateSection {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            cache_ttl: Duration::from_secs(300),
            legacy_single_file: false,
        }
    }
}

fn classify(file_name: &str, provider: &str, legacy_single_file: bool) -> Option<u8> {
    if file_name == format!("{provider}inst_templates.json") || file_name == format!("{provider}inst_templates.yaml") {
        return Some(PRIORITY_INSTANCE);
    }
    if file_name == format!("{provider}type_templates.json") || file_name == format!("{provider}type_templates.yaml") {
        return Some(PRIORITY_TYPE);
    }
    if file_name == format!("{provider}prov_templates.json") || file_name == format!("{provider}prov_templates.yaml") {
        return Some(PRIORITY_MAIN);
    }
    if file_name == "templates.json" || file_name == "templates.yaml" {
        return Some(PRIORITY_LEGACY);
    }
    if legacy_single_file && (file_name == format!("{provider}_templates.json") || file_name == format!("{provider}_templates.yaml")) {
        return Some(PRIORITY_LEGACY);
    }
    None
}

fn parse_templates(path: &Path, bytes: &[u8]) -> Result<Vec<Template>, BrokerError> {
    let is_yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"));
    if is_yaml {
        serde_yaml::from_slice(bytes)
            .map_err(|e| BrokerError::Validation(format!("{}: invalid YAML template file: {e}", path.display())))
    } else {
        serde_json::from_slice(bytes)
            .map_err(|e| BrokerError::Validation(format!("{}: invalid JSON template file: {e}", path.display())))
    }
}

/// Walk `section.search_paths`, parse every recognized template file, and
/// merge by template id, keeping the lowest-priority-number source on
/// collision. Later-discovered files of equal priority lose to earlier
/// ones (first write wins at a given priority).
pub fn discover_and_merge(section: &TemplateSection, provider: &str) -> Result<HashMap<TemplateId, Template>, BrokerError> {
    let mut merged: HashMap<TemplateId, Template> = HashMap::new();

    for dir in &section.search_paths {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(path = %dir.display(), error = %err, "template search path unreadable, skipping");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(priority) = classify(file_name, provider, section.legacy_single_file) else {
                continue;
            };
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to read template file");
                    continue;
                }
            };
            let templates = match parse_templates(&path, &bytes) {
                Ok(templates) => templates,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to parse template file");
                    continue;
                }
            };
            for mut template in templates {
                template.source_priority = priority;
                match merged.get(&template.template_id) {
                    Some(existing) if existing.source_priority <= priority => {}
                    _ => {
                        merged.insert(template.template_id.clone(), template);
                    }
                }
            }
        }
    }

    Ok(merged)
}

/// Canonicalize scheduler-strategy-agnostic quirks: normalize the ABIS
/// sub-block shape and collapse camelCase provider key variants to the
/// canonical snake_case ones Template expects. Templates parsed via serde
/// already land in canonical form for the fields this crate defines;
/// normalize() exists as the single seam for future vendor key variants
/// without touching the discovery/merge steps.
pub fn normalize(template: &mut Template) {
    if let Some(abis) = &template.abis_instance_requirements
        && abis.vcpu_count.min > abis.vcpu_count.max
    {
        warn!(template_id = %template.template_id, "ABIS vcpu_count range has min > max, swapping");
        template.abis_instance_requirements = Some(brk_proto::AbisRequirements {
            vcpu_count: brk_proto::Range {
                min: abis.vcpu_count.max,
                max: abis.vcpu_count.min,
            },
            memory_mib: abis.memory_mib,
            attribute_filters: abis.attribute_filters.clone(),
        });
    }
}

struct CacheEntry {
    templates: HashMap<TemplateId, Template>,
    loaded_at: Instant,
}

/// A TTL-cached, single-flighted view over [`discover_and_merge`]. Cheap
/// to clone — all state lives behind an `Arc`.
#[derive(Clone)]
pub struct TemplateCache {
    section: Arc<TemplateSection>,
    provider: Arc<str>,
    entry: Arc<AsyncMutex<Option<CacheEntry>>>,
}

impl TemplateCache {
    pub fn new(section: TemplateSection, provider: impl Into<Arc<str>>) -> Self {
        Self {
            section: Arc::new(section),
            provider: provider.into(),
            entry: Arc::new(AsyncMutex::new(None)),
        }
    }

    /// Return the current template map, refreshing from disk if the
    /// cache is empty or has exceeded its TTL. Concurrent callers
    /// observing a stale cache serialize on the same refresh rather than
    /// each re-reading the filesystem.
    pub async fn resolve(&self) -> Result<HashMap<TemplateId, Template>, BrokerError> {
        let mut guard = self.entry.lock().await;
        let needs_refresh = match &*guard {
            Some(entry) => entry.loaded_at.elapsed() >= self.section.cache_ttl,
            None => true,
        };
        if needs_refresh {
            let mut templates = discover_and_merge(&self.section, &self.provider)?;
            for template in templates.values_mut() {
                normalize(template);
            }
            *guard = Some(CacheEntry {
                templates: templates.clone(),
                loaded_at: Instant::now(),
            });
            return Ok(templates);
        }
        Ok(guard.as_ref().expect("checked Some above").templates.clone())
    }

    /// Force-refresh command: drop the cached entry unconditionally.
    pub async fn invalidate(&self) {
        *self.entry.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    fn sample_template(id: &str) -> String {
        format!(
            r#"[{{"template_id":"{id}","provider_api":"fleet","provider_name":null,"image_id":"ami-1","instance_type":"t3.medium","instance_types":[],"subnet_ids":[],"security_group_ids":[],"key_name":null,"user_data":null,"tags":{{}},"max_number":5,"abis_instance_requirements":null,"native_spec":{{}}}}]"#
        )
    }

    #[tokio::test]
    async fn higher_priority_file_wins_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "awsprov_templates.json", &sample_template("t1"));
        write(dir.path(), "awsinst_templates.json", &sample_template("t1"));

        let section = TemplateSection {
            search_paths: vec![dir.path().to_path_buf()],
            ..Default::default()
        };
        let merged = discover_and_merge(&section, "aws").unwrap();
        assert_eq!(merged["t1"].source_priority, PRIORITY_INSTANCE);
    }

    #[tokio::test]
    async fn legacy_single_file_ignored_unless_flag_set() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "aws_templates.json", &sample_template("t1"));

        let section = TemplateSection {
            search_paths: vec![dir.path().to_path_buf()],
            legacy_single_file: false,
            ..Default::default()
        };
        let merged = discover_and_merge(&section, "aws").unwrap();
        assert!(merged.is_empty());

        let section_legacy = TemplateSection {
            legacy_single_file: true,
            ..section
        };
        let merged = discover_and_merge(&section_legacy, "aws").unwrap();
        assert_eq!(merged.len(), 1);
    }

    #[tokio::test]
    async fn cache_serves_stale_entry_until_ttl_elapses() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "awsinst_templates.json", &sample_template("t1"));
        let section = TemplateSection {
            search_paths: vec![dir.path().to_path_buf()],
            cache_ttl: Duration::from_millis(20),
            legacy_single_file: false,
        };
        let cache = TemplateCache::new(section, "aws");
        let first = cache.resolve().await.unwrap();
        assert_eq!(first.len(), 1);

        write(dir.path(), "awstype_templates.json", &sample_template("t2"));
        let still_cached = cache.resolve().await.unwrap();
        assert_eq!(still_cached.len(), 1, "cache should not have refreshed yet");

        tokio::time::sleep(Duration::from_millis(30)).await;
        let refreshed = cache.resolve().await.unwrap();
        assert_eq!(refreshed.len(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_immediate_refresh() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "awsinst_templates.json", &sample_template("t1"));
        let section = TemplateSection {
            search_paths: vec![dir.path().to_path_buf()],
            cache_ttl: Duration::from_secs(300),
            legacy_single_file: false,
        };
        let cache = TemplateCache::new(section, "aws");
        cache.resolve().await.unwrap();
        write(dir.path(), "awstype_templates.json", &sample_template("t2"));
        cache.invalidate().await;
        let refreshed = cache.resolve().await.unwrap();
        assert_eq!(refreshed.len(), 2);
    }
}
