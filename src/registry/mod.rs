//! Model registry
//!
//! Trained models live in two places: a JSON artifact on disk (the source of
//! truth for serving) and a metadata row in the `model_registry` table. The
//! artifact write is primary; if the metadata insert fails the artifact is
//! kept and the failure is logged, never rolled back.
//!
//! Resolution walks three tiers: an explicitly requested version, then the
//! deployed registry row, then the newest artifact on disk by modification
//! time.


use crate::boost::Gbdt;
use crate::config::GbdtParams;
use crate::error::Result;
use crate::storage::Repository;
use crate::training::TrainedModel;
use crate::types::ModelRecord;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Canonical name of the market correction model
pub const CORRECTION_MODEL: &str = "market_correction";
/// Canonical name of the post usefulness model
pub const USEFULNESS_MODEL: &str = "post_usefulness";

/// A model loaded from disk, ready to serve
pub struct ResolvedModel {
    pub model: Gbdt,
    pub version: String,
    pub model_id: Option<String>,
}

/// Outcome of a save: where the artifact landed and how it was registered
#[derive(Debug, Clone)]
pub struct SavedModel {
    pub model_id: String,
    pub version: String,
    pub path: PathBuf,
}

pub struct ModelRegistry {
    models_dir: PathBuf,
    repo: Arc<dyn Repository>,
}

impl ModelRegistry {
    pub fn new(models_dir: PathBuf, repo: Arc<dyn Repository>) -> Self {
        Self { models_dir, repo }
    }

    /// Persist a trained model under `models_dir/<name>/<version>.json` and
    /// register its metadata.
    ///
    /// A `None` version gets a timestamp (`%Y%m%d_%H%M%S`). The metadata row
    /// is best-effort: a failed insert leaves the artifact in place so the
    /// mtime fallback can still find it.
    pub async fn save(
        &self,
        name: &str,
        version: Option<String>,
        trained: &TrainedModel,
        params: &GbdtParams,
    ) -> Result<SavedModel> {
        let version = version.unwrap_or_else(|| Utc::now().format("%Y%m%d_%H%M%S").to_string());
        let model_id = Uuid::new_v4().to_string();

        let dir = self.models_dir.join(name);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{version}.json"));
        fs::write(&path, serde_json::to_vec_pretty(&trained.model)?)?;
        tracing::info!("saved model artifact to {}", path.display());

        let record = ModelRecord {
            model_id: model_id.clone(),
            name: name.to_string(),
            version: version.clone(),
            kind: trained.kind,
            path: path.to_string_lossy().into_owned(),
            train_size: trained.train_size,
            metrics: trained.metrics.clone(),
            feature_importances: trained.importances.clone(),
            hyperparameters: serde_json::to_value(params)?,
            approved: false,
            deployed: false,
            created_at: Utc::now(),
        };
        if let Err(e) = self.repo.insert_model_record(&record).await {
            tracing::warn!("could not register model {name}:{version}: {e}");
        } else {
            tracing::info!("registered model {name}:{version} as {model_id}");
        }

        Ok(SavedModel { model_id, version, path })
    }

    /// Resolve a model for serving.
    ///
    /// `Ok(None)` means no model is available under the request; serving
    /// degrades to identity behavior rather than erroring.
    pub async fn resolve(&self, name: &str, version: Option<&str>) -> Result<Option<ResolvedModel>> {
        // Tier 1: explicit version, or nothing
        if let Some(version) = version {
            let path = self.models_dir.join(name).join(format!("{version}.json"));
            if !path.exists() {
                return Ok(None);
            }
            let model = load_artifact(&path)?;
            return Ok(Some(ResolvedModel {
                model,
                version: version.to_string(),
                model_id: None,
            }));
        }

        // Tier 2: deployed registry row. Registry trouble degrades to the
        // disk fallback instead of failing the lookup.
        match self.repo.deployed_model(name).await {
            Ok(Some(record)) => {
                let path = Path::new(&record.path);
                if path.exists() {
                    let model = load_artifact(path)?;
                    return Ok(Some(ResolvedModel {
                        model,
                        version: record.version,
                        model_id: Some(record.model_id),
                    }));
                }
                tracing::warn!(
                    "deployed model {name}:{} points at missing artifact {}",
                    record.version,
                    record.path
                );
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("deployed-model lookup failed for {name}: {e}"),
        }

        // Tier 3: newest artifact on disk
        match self.newest_artifact(name)? {
            Some((path, version)) => {
                let model = load_artifact(&path)?;
                Ok(Some(ResolvedModel { model, version, model_id: None }))
            }
            None => Ok(None),
        }
    }

    fn newest_artifact(&self, name: &str) -> Result<Option<(PathBuf, String)>> {
        let dir = self.models_dir.join(name);
        if !dir.is_dir() {
            return Ok(None);
        }

        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                newest = Some((modified, path));
            }
        }

        Ok(newest.map(|(_, path)| {
            let version = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            (path, version)
        }))
    }
}

fn load_artifact(path: &Path) -> Result<Gbdt> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Serving-side cache keyed by `name:version-or-latest`.
///
/// Entries are never evicted; a service restart picks up newly promoted
/// models, matching how deployments roll.
pub struct ModelCache {
    registry: ModelRegistry,
    loaded: RwLock<HashMap<String, Arc<ResolvedModel>>>,
}

impl ModelCache {
    pub fn new(registry: ModelRegistry) -> Self {
        Self { registry, loaded: RwLock::new(HashMap::new()) }
    }

    /// Cached resolve. `Ok(None)` propagates the registry's
    /// nothing-available answer and is not cached, so a model trained after
    /// startup becomes visible on the next request.
    pub async fn get(&self, name: &str, version: Option<&str>) -> Result<Option<Arc<ResolvedModel>>> {
        let key = format!("{name}:{}", version.unwrap_or("latest"));
        if let Some(found) = self.loaded.read().get(&key) {
            return Ok(Some(Arc::clone(found)));
        }

        let resolved = match self.registry.resolve(name, version).await? {
            Some(resolved) => Arc::new(resolved),
            None => return Ok(None),
        };
        self.loaded
            .write()
            .entry(key)
            .or_insert_with(|| Arc::clone(&resolved));
        Ok(Some(resolved))
    }
}

/// Write the cross-validation report beside the models, named
/// `<name>_report_<version>.json`.
pub fn write_training_report(
    reports_dir: &Path,
    name: &str,
    version: &str,
    trained: &TrainedModel,
) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)?;
    let path = reports_dir.join(format!("{name}_report_{version}.json"));
    let report = serde_json::json!({
        "name": name,
        "version": version,
        "train_size": trained.train_size,
        "metrics": trained.metrics,
        "feature_importances": trained.importances,
        "generated_at": Utc::now().to_rfc3339(),
    });
    fs::write(&path, serde_json::to_vec_pretty(&report)?)?;
    Ok(path)
}
