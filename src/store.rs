use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::*;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::entity::generations;
use crate::metadata::GenerationMetadata;

/// One persisted generation. Immutable after insert; an edit always
/// produces a new record pointing back at the one it edited.
#[derive(Debug, Clone, Serialize)]
pub struct Generation {
    pub id: i64,
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub image_path: Option<String>,
    pub model_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<GenerationMetadata>,
    pub parent_id: Option<i64>,
}

impl Generation {
    pub fn status(&self) -> GenerationStatus {
        GenerationStatus::derive(
            self.image_path.as_deref(),
            self.model_path.as_deref(),
            |p| p.exists(),
        )
    }
}

impl From<generations::Model> for Generation {
    fn from(r: generations::Model) -> Self {
        let metadata = r.metadata.as_deref().and_then(|raw| {
            match GenerationMetadata::from_json(raw) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    warn!("Unreadable metadata on generation {}: {}", r.id, e);
                    None
                }
            }
        });

        Self {
            id: r.id,
            prompt: r.prompt,
            enhanced_prompt: r.enhanced_prompt,
            image_path: r.image_path,
            model_path: r.model_path,
            created_at: DateTime::from_timestamp_micros(r.created_at_us).unwrap_or_default(),
            metadata,
            parent_id: r.parent_id,
        }
    }
}

/// Completion state, derived on every read from live file existence.
/// Never persisted: paths left dangling by out-of-band blob deletion
/// simply read as missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GenerationStatus {
    Complete,
    #[serde(rename = "Image Only")]
    ImageOnly,
    Incomplete,
}

impl GenerationStatus {
    pub fn derive(
        image_path: Option<&str>,
        model_path: Option<&str>,
        exists: impl Fn(&Path) -> bool,
    ) -> Self {
        if model_path.is_some_and(|p| exists(Path::new(p))) {
            Self::Complete
        } else if image_path.is_some_and(|p| exists(Path::new(p))) {
            Self::ImageOnly
        } else {
            Self::Incomplete
        }
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Complete => "Complete",
            Self::ImageOnly => "Image Only",
            Self::Incomplete => "Incomplete",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineageKind {
    Original,
    Edit,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineageEntry {
    pub kind: LineageKind,
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub previous_enhanced_prompt: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: String,
    pub required: bool,
    pub default_value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DatabaseEntry {
    pub generation: Generation,
    pub status: GenerationStatus,
}

#[derive(Debug, Default, Serialize)]
pub struct DatabaseInfo {
    pub total_entries: usize,
    pub schema: Vec<ColumnInfo>,
    pub entries: Vec<DatabaseEntry>,
}

#[derive(Debug, Default)]
pub struct NewGeneration {
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub image_path: Option<String>,
    pub model_path: Option<String>,
    pub metadata: Option<GenerationMetadata>,
    pub parent_id: Option<i64>,
}

/// Durable record of every generation, plus the derived queries over it.
///
/// Every public operation converts storage errors into its documented
/// failure value (`None`, `false` or an empty list) after logging; nothing
/// propagates to callers as an error. The store opens a connection for the
/// duration of each logical operation, the same way it treats blobs: no
/// long-lived handles, no cross-operation locking.
pub struct GenerationStore {
    db_url: String,
}

impl GenerationStore {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("generations.db");
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        tokio::task::spawn_blocking({
            let db_url = db_url.clone();
            move || -> Result<()> {
                let db = Database::connect(&db_url)?;

                db.get_schema_builder()
                    .register(generations::Entity)
                    .apply(&db)?;

                Ok(())
            }
        })
        .await??;

        info!("GenerationStore ready at {}", db_path.display());
        Ok(Self { db_url })
    }

    /// Insert a new record. Returns the assigned id, or `None` on a blank
    /// prompt or storage failure.
    pub async fn save(&self, new: NewGeneration) -> Option<i64> {
        if new.prompt.trim().is_empty() {
            error!("Refusing to save generation with empty prompt");
            return None;
        }

        match self.try_save(new).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!("Error saving generation: {}", e);
                None
            }
        }
    }

    /// Most recent generations, newest first.
    pub async fn recent(&self, limit: u64) -> Vec<Generation> {
        match self.try_recent(limit).await {
            Ok(rows) => rows,
            Err(e) => {
                error!("Error listing generations: {}", e);
                Vec::new()
            }
        }
    }

    /// Case-insensitive substring search over prompt and enhanced prompt.
    pub async fn search(&self, term: &str) -> Vec<Generation> {
        let term = term.trim().to_string();
        if term.is_empty() {
            return Vec::new();
        }

        match self.try_search(term).await {
            Ok(rows) => rows,
            Err(e) => {
                error!("Error searching generations: {}", e);
                Vec::new()
            }
        }
    }

    /// Load a single record by id.
    pub async fn get(&self, id: i64) -> Option<Generation> {
        match self.try_get(id).await {
            Ok(found) => found,
            Err(e) => {
                error!("Error loading generation {}: {}", id, e);
                None
            }
        }
    }

    /// Delete a record and its referenced blobs. Blob and directory
    /// cleanup failures are logged but never fail the operation; `false`
    /// means the id did not exist or the row removal itself failed.
    pub async fn delete(&self, id: i64) -> bool {
        match self.try_delete(id).await {
            Ok(deleted) => deleted,
            Err(e) => {
                error!("Error deleting generation {}: {}", id, e);
                false
            }
        }
    }

    /// Delete every record and its blobs.
    pub async fn clear_all(&self) -> bool {
        match self.try_clear_all().await {
            Ok(()) => true,
            Err(e) => {
                error!("Error clearing generations: {}", e);
                false
            }
        }
    }

    /// Reconstruct the edit chain containing `id`: the chain root first,
    /// then every descendant edit in chronological order. Empty when the
    /// id does not exist.
    pub async fn edit_lineage(&self, id: i64) -> Vec<LineageEntry> {
        match self.try_edit_lineage(id).await {
            Ok(lineage) => lineage,
            Err(e) => {
                error!("Error reconstructing lineage for {}: {}", id, e);
                Vec::new()
            }
        }
    }

    /// Most relevant past generation for a prompt: keyword overlap with
    /// stored prompts, ties broken by recency. Keyword matching stands in
    /// for real text similarity for now.
    pub async fn similar_context(&self, prompt: &str) -> Option<Generation> {
        let mut words: Vec<String> = prompt
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        words.sort();
        words.dedup();
        if words.is_empty() {
            return None;
        }

        match self.try_similar_context(words).await {
            Ok(found) => found,
            Err(e) => {
                error!("Error looking up similar context: {}", e);
                None
            }
        }
    }

    /// Table structure plus every record with its derived status.
    pub async fn introspect(&self) -> DatabaseInfo {
        match self.try_introspect().await {
            Ok(info) => info,
            Err(e) => {
                error!("Error reading database info: {}", e);
                DatabaseInfo::default()
            }
        }
    }

    async fn try_save(&self, new: NewGeneration) -> Result<i64> {
        let metadata = new.metadata.map(|m| m.to_json()).transpose()?;
        let record = generations::ActiveModel {
            id: NotSet,
            prompt: Set(new.prompt),
            enhanced_prompt: Set(new.enhanced_prompt),
            image_path: Set(new.image_path),
            model_path: Set(new.model_path),
            created_at_us: Set(Utc::now().timestamp_micros()),
            metadata: Set(metadata),
            parent_id: Set(new.parent_id),
        };

        let db_url = self.db_url.clone();
        tokio::task::spawn_blocking(move || -> Result<i64> {
            let db = Database::connect(&db_url)?;
            let result = generations::Entity::insert(record).exec(&db)?;
            Ok(result.last_insert_id)
        })
        .await?
    }

    async fn try_recent(&self, limit: u64) -> Result<Vec<Generation>> {
        let db_url = self.db_url.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Generation>> {
            let db = Database::connect(&db_url)?;
            let rows = generations::Entity::find()
                .order_by_desc(generations::Column::CreatedAtUs)
                .order_by_desc(generations::Column::Id)
                .limit(limit)
                .all(&db)?;

            Ok(rows.into_iter().map(Generation::from).collect())
        })
        .await?
    }

    async fn try_search(&self, term: String) -> Result<Vec<Generation>> {
        let db_url = self.db_url.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Generation>> {
            let db = Database::connect(&db_url)?;
            let rows = generations::Entity::find()
                .filter(
                    Condition::any()
                        .add(generations::Column::Prompt.contains(&term))
                        .add(generations::Column::EnhancedPrompt.contains(&term)),
                )
                .order_by_desc(generations::Column::CreatedAtUs)
                .order_by_desc(generations::Column::Id)
                .all(&db)?;

            Ok(rows.into_iter().map(Generation::from).collect())
        })
        .await?
    }

    async fn try_get(&self, id: i64) -> Result<Option<Generation>> {
        let db_url = self.db_url.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<Generation>> {
            let db = Database::connect(&db_url)?;
            let row = generations::Entity::find_by_id(id).one(&db)?;
            Ok(row.map(Generation::from))
        })
        .await?
    }

    async fn try_delete(&self, id: i64) -> Result<bool> {
        let db_url = self.db_url.clone();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let db = Database::connect(&db_url)?;
            let Some(record) = generations::Entity::find_by_id(id).one(&db)? else {
                return Ok(false);
            };

            // Files go first; a crash before the row delete leaves a row
            // with dangling paths, which status derivation tolerates.
            let removed = remove_blobs([
                record.image_path.as_deref(),
                record.model_path.as_deref(),
            ]);

            let result = generations::Entity::delete_by_id(id).exec(&db)?;
            prune_parent_dirs(&removed);

            Ok(result.rows_affected > 0)
        })
        .await?
    }

    async fn try_clear_all(&self) -> Result<()> {
        let db_url = self.db_url.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let db = Database::connect(&db_url)?;
            let rows = generations::Entity::find().all(&db)?;

            let mut removed = Vec::new();
            for row in &rows {
                removed.extend(remove_blobs([
                    row.image_path.as_deref(),
                    row.model_path.as_deref(),
                ]));
            }

            generations::Entity::delete_many().exec(&db)?;
            prune_parent_dirs(&removed);

            Ok(())
        })
        .await?
    }

    async fn try_edit_lineage(&self, id: i64) -> Result<Vec<LineageEntry>> {
        let db_url = self.db_url.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<LineageEntry>> {
            let db = Database::connect(&db_url)?;
            let Some(mut root) = generations::Entity::find_by_id(id).one(&db)? else {
                return Ok(Vec::new());
            };

            // Any member of a chain yields the same lineage: climb parent
            // pointers to the root first. A deleted ancestor truncates the
            // climb at the oldest surviving record.
            while let Some(parent_id) = root.parent_id {
                match generations::Entity::find_by_id(parent_id).one(&db)? {
                    Some(parent) => root = parent,
                    None => break,
                }
            }

            let edits = generations::Entity::find()
                .filter(generations::Column::ParentId.is_not_null())
                .all(&db)?;

            let mut descendants: Vec<generations::Model> = Vec::new();
            let mut frontier = vec![root.id];
            let mut remaining = edits;
            while !frontier.is_empty() {
                let (hit, rest): (Vec<_>, Vec<_>) = remaining
                    .into_iter()
                    .partition(|e| e.parent_id.is_some_and(|p| frontier.contains(&p)));
                frontier = hit.iter().map(|e| e.id).collect();
                descendants.extend(hit);
                remaining = rest;
            }
            descendants.sort_by_key(|e| (e.created_at_us, e.id));

            let root = Generation::from(root);
            let mut lineage = vec![LineageEntry {
                kind: LineageKind::Original,
                prompt: root.prompt,
                enhanced_prompt: root.enhanced_prompt,
                previous_enhanced_prompt: None,
                timestamp: root.created_at,
            }];

            for edit in descendants {
                let edit = Generation::from(edit);
                lineage.push(LineageEntry {
                    kind: LineageKind::Edit,
                    previous_enhanced_prompt: edit
                        .metadata
                        .as_ref()
                        .and_then(|m| m.edit_history())
                        .map(|h| h.previous_enhanced_prompt.clone()),
                    prompt: edit.prompt,
                    enhanced_prompt: edit.enhanced_prompt,
                    timestamp: edit.created_at,
                });
            }

            Ok(lineage)
        })
        .await?
    }

    async fn try_similar_context(&self, words: Vec<String>) -> Result<Option<Generation>> {
        let db_url = self.db_url.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<Generation>> {
            let db = Database::connect(&db_url)?;

            let mut condition = Condition::any();
            for word in &words {
                condition = condition.add(generations::Column::Prompt.contains(word));
            }
            let candidates = generations::Entity::find().filter(condition).all(&db)?;

            let best = candidates.into_iter().max_by_key(|c| {
                let prompt = c.prompt.to_lowercase();
                let matches = words.iter().filter(|w| prompt.contains(w.as_str())).count();
                (matches, c.created_at_us, c.id)
            });

            Ok(best.map(Generation::from))
        })
        .await?
    }

    async fn try_introspect(&self) -> Result<DatabaseInfo> {
        let db_url = self.db_url.clone();
        tokio::task::spawn_blocking(move || -> Result<DatabaseInfo> {
            let db = Database::connect(&db_url)?;

            let schema = db
                .query_all_raw(Statement::from_string(
                    DbBackend::Sqlite,
                    "PRAGMA table_info(generations)".to_string(),
                ))?
                .into_iter()
                .map(|row| -> Result<ColumnInfo> {
                    Ok(ColumnInfo {
                        name: row.try_get("", "name")?,
                        column_type: row.try_get("", "type")?,
                        required: row.try_get::<i64>("", "notnull")? != 0,
                        default_value: row.try_get("", "dflt_value")?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let rows = generations::Entity::find()
                .order_by_desc(generations::Column::CreatedAtUs)
                .order_by_desc(generations::Column::Id)
                .all(&db)?;

            let entries: Vec<DatabaseEntry> = rows
                .into_iter()
                .map(|r| {
                    let generation = Generation::from(r);
                    let status = generation.status();
                    DatabaseEntry { generation, status }
                })
                .collect();

            Ok(DatabaseInfo {
                total_entries: entries.len(),
                schema,
                entries,
            })
        })
        .await?
    }
}

/// Remove the blob files a record references, returning the paths that
/// were actually deleted. Individual failures are logged and skipped.
fn remove_blobs<'a>(paths: impl IntoIterator<Item = Option<&'a str>>) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for path in paths.into_iter().flatten() {
        let path = Path::new(path);
        if !path.exists() {
            continue;
        }
        match std::fs::remove_file(path) {
            Ok(()) => {
                info!("Deleted blob {}", path.display());
                removed.push(path.to_path_buf());
            }
            Err(e) => error!("Error deleting blob {}: {}", path.display(), e),
        }
    }
    removed
}

/// Drop the containing directories of deleted blobs once they are empty.
fn prune_parent_dirs(removed: &[PathBuf]) {
    let mut dirs: Vec<&Path> = removed.iter().filter_map(|p| p.parent()).collect();
    dirs.sort();
    dirs.dedup();

    for dir in dirs {
        match std::fs::read_dir(dir) {
            Ok(mut entries) => {
                if entries.next().is_none() {
                    match std::fs::remove_dir(dir) {
                        Ok(()) => info!("Removed empty directory {}", dir.display()),
                        Err(e) => {
                            error!("Error removing directory {}: {}", dir.display(), e)
                        }
                    }
                }
            }
            Err(e) => error!("Error reading directory {}: {}", dir.display(), e),
        }
    }
}
