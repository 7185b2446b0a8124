//! Codebase indexer.
//!
//! Turns parsed source files into Function and Component memories,
//! incrementally by content hash, and materializes IMPORTS and CALLS edges
//! after the fact. Per-file failures are collected, never fatal; conflict
//! detection stays off to keep bulk rates high.

use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::{JobRegistry, JobStatus, JobUpdate};
use crate::manager::MemoryManager;
use crate::memory::{
    ComponentFields, ComponentType, FunctionFields, Memory, MemoryFields, MemoryKind, Payload,
    RelationshipType,
};
use crate::parsing::{ClassInfo, FunctionInfo, ParseResult, ParserOrchestrator};
use crate::store::{Filter, GraphStore, VectorStore};

/// Directory names never worth indexing.
const DEFAULT_EXCLUDES: [&str; 6] = [
    ".git",
    "__pycache__",
    "node_modules",
    ".venv",
    "venv",
    "target",
];

/// Content hash for incremental indexing: sha256(path ‖ 0x00 ‖ bytes), hex.
pub fn file_content_hash(path: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0x00]);
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOutcomeStatus {
    Success,
    Partial,
    Skipped,
    Error,
}

/// Result of indexing one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileIndexOutcome {
    pub status: IndexOutcomeStatus,
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub functions_indexed: u64,
    pub components_indexed: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl FileIndexOutcome {
    fn skipped(file_path: &str) -> Self {
        Self {
            status: IndexOutcomeStatus::Skipped,
            file_path: file_path.to_string(),
            language: None,
            functions_indexed: 0,
            components_indexed: 0,
            errors: Vec::new(),
        }
    }

    fn error(file_path: &str, message: String) -> Self {
        Self {
            status: IndexOutcomeStatus::Error,
            file_path: file_path.to_string(),
            language: None,
            functions_indexed: 0,
            components_indexed: 0,
            errors: vec![message],
        }
    }
}

/// Result of a directory run.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryIndexOutcome {
    pub status: IndexOutcomeStatus,
    pub directory: String,
    pub files_found: u64,
    pub files_processed: u64,
    pub files_skipped: u64,
    pub files_errored: u64,
    pub functions_indexed: u64,
    pub components_indexed: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
}

pub struct Indexer {
    manager: Arc<MemoryManager>,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    jobs: Arc<JobRegistry>,
    parser: ParserOrchestrator,
    /// file path -> content hash of the last indexed version.
    file_hashes: Mutex<HashMap<String, String>>,
}

impl Indexer {
    pub fn new(
        manager: Arc<MemoryManager>,
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        jobs: Arc<JobRegistry>,
        parser: ParserOrchestrator,
    ) -> Self {
        info!("indexer initialized");
        Self {
            manager,
            vector,
            graph,
            jobs,
            parser,
            file_hashes: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_hash(&self, file_path: &str) -> Option<String> {
        self.file_hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(file_path)
            .cloned()
    }

    fn remember_hash(&self, file_path: &str, hash: String) {
        self.file_hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file_path.to_string(), hash);
    }

    /// Index a single file. Reads from disk unless `content` is supplied.
    pub async fn index_file(
        &self,
        file_path: &Path,
        force: bool,
        content: Option<String>,
    ) -> FileIndexOutcome {
        let path_str = file_path.to_string_lossy().to_string();

        let content = match content {
            Some(content) => content,
            None => match std::fs::read_to_string(file_path) {
                Ok(content) => content,
                Err(e) => {
                    error!(file_path = %path_str, error = %e, "index read failed");
                    return FileIndexOutcome::error(
                        &path_str,
                        format!("failed to read file: {}", e),
                    );
                }
            },
        };

        let content_hash = file_content_hash(&path_str, &content);
        if !force && self.cached_hash(&path_str).as_deref() == Some(content_hash.as_str()) {
            debug!(file_path = %path_str, "index skipped, content unchanged");
            return FileIndexOutcome::skipped(&path_str);
        }

        let parse_result = self.parser.parse_file(&path_str, &content);
        if !parse_result.errors.is_empty() {
            warn!(
                file_path = %path_str,
                errors = parse_result.errors.len(),
                "parse reported errors"
            );
        }

        self.index_parse_result(&parse_result, content_hash).await
    }

    /// Index an already-parsed file.
    async fn index_parse_result(
        &self,
        parse_result: &ParseResult,
        content_hash: String,
    ) -> FileIndexOutcome {
        let mut functions_indexed = 0_u64;
        let mut components_indexed = 0_u64;
        let mut errors: Vec<String> = parse_result.errors.clone();
        // Anchor entity for file-level import edges.
        let mut anchor: Option<Uuid> = None;

        for function_info in &parse_result.functions {
            let memory = build_function_memory(function_info, &parse_result.language, None);
            match self.manager.add(memory, false, true).await {
                Ok((id, _)) => {
                    functions_indexed += 1;
                    anchor.get_or_insert(id);
                }
                Err(e) => {
                    errors.push(format!("function {}: {}", function_info.name, e));
                    error!(function = %function_info.name, error = %e, "function index failed");
                }
            }
        }

        for class_info in &parse_result.classes {
            let memory = build_component_memory(class_info, &parse_result.language);
            let component_id = match self.manager.add(memory, false, true).await {
                Ok((id, _)) => {
                    components_indexed += 1;
                    // Components take anchor precedence over functions.
                    anchor = Some(id);
                    id
                }
                Err(e) => {
                    errors.push(format!("class {}: {}", class_info.name, e));
                    error!(class = %class_info.name, error = %e, "class index failed");
                    continue;
                }
            };

            for method_info in &class_info.methods {
                let memory = build_function_memory(
                    method_info,
                    &parse_result.language,
                    Some(component_id),
                );
                match self.manager.add(memory, false, true).await {
                    Ok(_) => functions_indexed += 1,
                    Err(e) => {
                        errors.push(format!(
                            "method {}.{}: {}",
                            class_info.name, method_info.name, e
                        ));
                    }
                }
            }
        }

        self.remember_hash(&parse_result.file_path, content_hash);
        self.create_import_relationships(parse_result, anchor).await;

        let status = if errors.is_empty() {
            IndexOutcomeStatus::Success
        } else {
            IndexOutcomeStatus::Partial
        };

        info!(
            file_path = %parse_result.file_path,
            functions = functions_indexed,
            components = components_indexed,
            errors = errors.len(),
            "file indexed"
        );

        FileIndexOutcome {
            status,
            file_path: parse_result.file_path.clone(),
            language: Some(parse_result.language.clone()),
            functions_indexed,
            components_indexed,
            errors,
        }
    }

    /// Best-effort IMPORTS edges: importing file's anchor entity -> the
    /// Component whose component_id matches the imported symbol's tail.
    async fn create_import_relationships(
        &self,
        parse_result: &ParseResult,
        anchor: Option<Uuid>,
    ) {
        let Some(source) = anchor else {
            return;
        };

        for import in &parse_result.imports {
            let target_name = import
                .name
                .clone()
                .unwrap_or_else(|| {
                    import
                        .module
                        .rsplit('.')
                        .next()
                        .unwrap_or(&import.module)
                        .to_string()
                });

            let filter = Filter::new()
                .eq("component_id", target_name.clone())
                .eq("deleted", false);
            let lookup = self
                .vector
                .scroll(MemoryKind::Component.collection(), &filter, 1, None, false)
                .await;

            let target = match lookup {
                Ok(page) => page.points.first().map(|p| p.id),
                Err(e) => {
                    debug!(import = %import.module, error = %e, "import lookup failed");
                    continue;
                }
            };
            let Some(target) = target else {
                continue;
            };
            if target == source {
                continue;
            }

            let mut properties = Payload::new();
            properties.insert("module".into(), Value::from(import.module.clone()));
            properties.insert("name".into(), Value::from(target_name));
            properties.insert("alias".into(), json!(import.alias.clone()));
            properties.insert("is_relative".into(), Value::Bool(import.is_relative));
            properties.insert("line".into(), Value::from(import.line));

            if let Err(e) = self
                .graph
                .create_relationship(
                    source,
                    target,
                    RelationshipType::Imports.as_str(),
                    properties,
                )
                .await
            {
                debug!(import = %import.module, error = %e, "import relationship failed");
            }
        }
    }

    /// After a directory pass, wire CALLS edges from the call names the
    /// parser recorded. Unresolvable names are silently skipped.
    async fn create_call_relationships(&self) {
        let live = Filter::new().eq("deleted", false);
        let mut all_functions = Vec::new();
        let mut offset = None;

        loop {
            let page = match self
                .vector
                .scroll(MemoryKind::Function.collection(), &live, 200, offset, false)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, "call relationship scan failed");
                    return;
                }
            };
            all_functions.extend(page.points);
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        let name_to_id: HashMap<String, Uuid> = all_functions
            .iter()
            .filter_map(|point| {
                point
                    .payload
                    .get("name")
                    .and_then(Value::as_str)
                    .map(|name| (name.to_string(), point.id))
            })
            .collect();

        for point in &all_functions {
            let calls = point
                .payload
                .get("metadata")
                .and_then(|m| m.get("calls"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for call in calls.iter().filter_map(Value::as_str) {
                let Some(&target) = name_to_id.get(call) else {
                    continue;
                };
                if target == point.id {
                    continue;
                }
                let mut properties = Payload::new();
                properties.insert("call_name".into(), Value::from(call));
                if let Err(e) = self
                    .graph
                    .create_relationship(
                        point.id,
                        target,
                        RelationshipType::Calls.as_str(),
                        properties,
                    )
                    .await
                {
                    debug!(call_name = call, error = %e, "call relationship failed");
                }
            }
        }
    }

    /// Index every matching file under a directory, reporting phase and
    /// progress to the job registry and polling the shutdown signal between
    /// files.
    pub async fn index_directory(
        &self,
        directory: &Path,
        job_id: Option<&str>,
        extensions: Option<&[String]>,
        exclude: Option<&[String]>,
        force: bool,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> DirectoryIndexOutcome {
        let dir_str = directory.to_string_lossy().to_string();

        if !directory.is_dir() {
            let outcome = DirectoryIndexOutcome {
                status: IndexOutcomeStatus::Error,
                directory: dir_str.clone(),
                files_found: 0,
                files_processed: 0,
                files_skipped: 0,
                files_errored: 0,
                functions_indexed: 0,
                components_indexed: 0,
                errors: vec![json!({"directory": dir_str, "errors": ["directory does not exist"]})],
            };
            if let Some(job_id) = job_id {
                self.jobs.update(
                    job_id,
                    JobUpdate {
                        status: Some(JobStatus::Failed),
                        error: Some("directory does not exist".into()),
                        ..Default::default()
                    },
                );
            }
            return outcome;
        }

        if let Some(job_id) = job_id {
            self.jobs
                .update(job_id, JobUpdate::status(JobStatus::Running));
            self.jobs.update(job_id, JobUpdate::phase("scanning", 0));
        }

        let files = self.collect_files(directory, extensions, exclude);
        let total_files = files.len() as u64;

        if let Some(job_id) = job_id {
            self.jobs.update(job_id, JobUpdate::phase("indexing", 5));
        }

        let mut outcome = DirectoryIndexOutcome {
            status: IndexOutcomeStatus::Success,
            directory: dir_str,
            files_found: total_files,
            files_processed: 0,
            files_skipped: 0,
            files_errored: 0,
            functions_indexed: 0,
            components_indexed: 0,
            errors: Vec::new(),
        };

        for (i, file) in files.iter().enumerate() {
            if shutdown.map(|rx| *rx.borrow()).unwrap_or(false) {
                info!("directory indexing interrupted by shutdown");
                if let Some(job_id) = job_id {
                    self.jobs.update(
                        job_id,
                        JobUpdate {
                            status: Some(JobStatus::Failed),
                            error: Some("cancelled".into()),
                            ..Default::default()
                        },
                    );
                }
                outcome.status = IndexOutcomeStatus::Partial;
                return outcome;
            }

            let file_outcome = self.index_file(file, force, None).await;
            match file_outcome.status {
                IndexOutcomeStatus::Skipped => outcome.files_skipped += 1,
                IndexOutcomeStatus::Error => {
                    outcome.files_errored += 1;
                    outcome.errors.push(json!({
                        "file": file_outcome.file_path,
                        "errors": file_outcome.errors,
                    }));
                }
                IndexOutcomeStatus::Success | IndexOutcomeStatus::Partial => {
                    outcome.files_processed += 1;
                    outcome.functions_indexed += file_outcome.functions_indexed;
                    outcome.components_indexed += file_outcome.components_indexed;
                    if file_outcome.status == IndexOutcomeStatus::Partial {
                        outcome.errors.push(json!({
                            "file": file_outcome.file_path,
                            "errors": file_outcome.errors,
                        }));
                    }
                }
            }

            if let Some(job_id) = job_id {
                if total_files > 0 {
                    let progress = 5 + ((i as u64 + 1) * 90 / total_files) as u8;
                    self.jobs.update(job_id, JobUpdate::progress(progress));
                }
            }
        }

        if let Some(job_id) = job_id {
            self.jobs
                .update(job_id, JobUpdate::phase("relationships", 95));
        }
        self.create_call_relationships().await;

        if outcome.files_errored > 0 {
            outcome.status = IndexOutcomeStatus::Partial;
        }

        if let Some(job_id) = job_id {
            self.jobs.update(
                job_id,
                JobUpdate {
                    status: Some(JobStatus::Completed),
                    phase: Some("complete".into()),
                    progress: Some(100),
                    result: serde_json::to_value(&outcome).ok(),
                    ..Default::default()
                },
            );
        }

        info!(
            directory = %outcome.directory,
            files_processed = outcome.files_processed,
            files_skipped = outcome.files_skipped,
            functions = outcome.functions_indexed,
            components = outcome.components_indexed,
            "directory indexing complete"
        );
        outcome
    }

    /// Remove everything the indexer produced and reset the hash table.
    pub async fn clear_index(&self) -> Result<HashMap<String, u64>> {
        let by_source = Filter::new().eq("source", "indexer");
        let mut deleted = HashMap::new();

        let functions = self
            .vector
            .delete_by_filter(MemoryKind::Function.collection(), &by_source)
            .await?;
        deleted.insert("functions".to_string(), functions);

        let components = self
            .vector
            .delete_by_filter(MemoryKind::Component.collection(), &by_source)
            .await?;
        deleted.insert("components".to_string(), components);

        self.file_hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        info!(?deleted, "index cleared");
        Ok(deleted)
    }

    /// Recursive walk honoring extension includes and exclusion patterns.
    fn collect_files(
        &self,
        directory: &Path,
        extensions: Option<&[String]>,
        exclude: Option<&[String]>,
    ) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut stack = vec![directory.to_path_buf()];

        let excluded = |path: &Path| {
            let path_str = path.to_string_lossy();
            DEFAULT_EXCLUDES
                .iter()
                .any(|pattern| path_str.contains(pattern))
                || exclude
                    .map(|patterns| patterns.iter().any(|p| path_str.contains(p.as_str())))
                    .unwrap_or(false)
        };

        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if excluded(&path) {
                    continue;
                }
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let matches_extension = match extensions {
                    Some(wanted) => path
                        .extension()
                        .and_then(|e| e.to_str())
                        .map(|ext| {
                            wanted
                                .iter()
                                .any(|w| w.trim_start_matches('.').eq_ignore_ascii_case(ext))
                        })
                        .unwrap_or(false),
                    None => self.parser.supports(&path.to_string_lossy()),
                };
                if matches_extension {
                    files.push(path);
                }
            }
        }

        files.sort();
        files
    }
}

/// Function memory: content is the signature plus docstring; structural
/// flags travel in metadata.
fn build_function_memory(
    function_info: &FunctionInfo,
    language: &str,
    containing_class: Option<Uuid>,
) -> Memory {
    let mut content = function_info.signature.clone();
    if let Some(docstring) = &function_info.docstring {
        content.push('\n');
        content.push_str(docstring);
    }

    let mut memory = Memory::new(
        content,
        MemoryFields::Function(FunctionFields {
            name: function_info.name.clone(),
            signature: function_info.signature.clone(),
            file_path: function_info.file_path.clone(),
            start_line: function_info.start_line,
            end_line: function_info.end_line,
            language: language.to_string(),
            docstring: function_info.docstring.clone(),
            containing_class,
            source: Some("indexer".to_string()),
        }),
    );

    memory.metadata.insert("is_async".into(), Value::Bool(function_info.is_async));
    memory.metadata.insert("is_method".into(), Value::Bool(function_info.is_method));
    memory.metadata.insert("is_static".into(), Value::Bool(function_info.is_static));
    memory
        .metadata
        .insert("is_classmethod".into(), Value::Bool(function_info.is_classmethod));
    memory
        .metadata
        .insert("is_property".into(), Value::Bool(function_info.is_property));
    memory
        .metadata
        .insert("decorators".into(), json!(function_info.decorators.clone()));
    memory
        .metadata
        .insert("return_type".into(), json!(function_info.return_type.clone()));
    memory.metadata.insert("calls".into(), json!(function_info.calls.clone()));
    memory
}

/// Component memory from a class: declaration line, docstring, and method
/// signatures form the content; the public interface summarizes callable
/// surface and class variables.
fn build_component_memory(class_info: &ClassInfo, language: &str) -> Memory {
    let mut declaration = format!("class {}", class_info.name);
    if !class_info.bases.is_empty() {
        declaration.push_str(&format!("({})", class_info.bases.join(", ")));
    }

    let mut content_parts = vec![declaration];
    if let Some(docstring) = &class_info.docstring {
        content_parts.push(docstring.clone());
    }
    for method in &class_info.methods {
        content_parts.push(method.signature.clone());
    }
    let content = content_parts.join("\n");

    let component_type = infer_component_type(class_info);

    let public_methods: Vec<Value> = class_info
        .methods
        .iter()
        .filter(|m| !m.name.starts_with('_') || m.name.starts_with("__"))
        .map(|m| {
            json!({
                "name": m.name,
                "signature": m.signature,
                "is_async": m.is_async,
            })
        })
        .collect();
    let class_variables: Vec<Value> = class_info
        .class_variables
        .iter()
        .map(|(name, type_annotation)| json!({"name": name, "type": type_annotation}))
        .collect();

    let mut memory = Memory::new(
        content,
        MemoryFields::Component(ComponentFields {
            component_id: class_info.name.clone(),
            component_type,
            name: class_info.name.clone(),
            file_path: class_info.file_path.clone(),
            public_interface: json!({
                "methods": public_methods,
                "class_variables": class_variables,
            }),
            version: None,
            source: Some("indexer".to_string()),
        }),
    );

    memory.metadata.insert("bases".into(), json!(class_info.bases.clone()));
    memory
        .metadata
        .insert("decorators".into(), json!(class_info.decorators.clone()));
    memory
        .metadata
        .insert("is_dataclass".into(), Value::Bool(class_info.is_dataclass));
    memory
        .metadata
        .insert("is_abstract".into(), Value::Bool(class_info.is_abstract));
    memory
        .metadata
        .insert("start_line".into(), Value::from(class_info.start_line));
    memory
        .metadata
        .insert("end_line".into(), Value::from(class_info.end_line));
    memory.metadata.insert("language".into(), Value::from(language));
    memory
}

/// Service/Agent naming beats the Library default; abstract classes stay
/// Library.
fn infer_component_type(class_info: &ClassInfo) -> ComponentType {
    if class_info.is_abstract {
        ComponentType::Library
    } else if class_info.name.contains("Service") {
        ComponentType::Service
    } else if class_info.name.contains("Agent") || class_info.name.contains("Worker") {
        ComponentType::Agent
    } else {
        ComponentType::Library
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::FunctionInfo;

    #[test]
    fn test_file_content_hash_separates_path_and_content() {
        // "ab" + "c" must differ from "a" + "bc".
        assert_ne!(file_content_hash("ab", "c"), file_content_hash("a", "bc"));
        assert_eq!(
            file_content_hash("a.py", "def foo(): pass"),
            file_content_hash("a.py", "def foo(): pass")
        );
        assert_eq!(file_content_hash("a.py", "x").len(), 64);
    }

    fn sample_function() -> FunctionInfo {
        FunctionInfo {
            name: "foo".into(),
            signature: "def foo(x: int) -> int".into(),
            file_path: "a.py".into(),
            start_line: 1,
            end_line: 3,
            docstring: Some("Doubles x.".into()),
            parameters: vec!["x: int".into()],
            return_type: Some("int".into()),
            decorators: vec![],
            is_async: false,
            is_method: false,
            is_static: false,
            is_classmethod: false,
            is_property: false,
            containing_class: None,
            calls: vec!["bar".into()],
        }
    }

    #[test]
    fn test_build_function_memory_content_and_metadata() {
        let memory = build_function_memory(&sample_function(), "python", None);
        assert_eq!(memory.content, "def foo(x: int) -> int\nDoubles x.");
        assert_eq!(memory.kind(), MemoryKind::Function);
        assert_eq!(memory.metadata["calls"], json!(["bar"]));
        assert_eq!(memory.metadata["is_async"], json!(false));

        let payload = memory.to_payload().unwrap();
        assert_eq!(payload["source"], json!("indexer"));
    }

    #[test]
    fn test_component_type_inference() {
        let mut class_info = ClassInfo {
            name: "UserService".into(),
            file_path: "a.py".into(),
            start_line: 1,
            end_line: 10,
            docstring: None,
            bases: vec![],
            decorators: vec![],
            methods: vec![],
            class_variables: vec![],
            is_dataclass: false,
            is_abstract: false,
        };
        assert_eq!(infer_component_type(&class_info), ComponentType::Service);

        class_info.name = "SyncWorker".into();
        assert_eq!(infer_component_type(&class_info), ComponentType::Agent);

        class_info.name = "Helpers".into();
        assert_eq!(infer_component_type(&class_info), ComponentType::Library);

        // Abstract wins even over a Service name.
        class_info.name = "BaseService".into();
        class_info.is_abstract = true;
        assert_eq!(infer_component_type(&class_info), ComponentType::Library);
    }

    #[test]
    fn test_component_public_interface_hides_private_methods() {
        let mut public = sample_function();
        public.name = "run".into();
        let mut private = sample_function();
        private.name = "_helper".into();
        let mut dunder = sample_function();
        dunder.name = "__init__".into();

        let class_info = ClassInfo {
            name: "Runner".into(),
            file_path: "a.py".into(),
            start_line: 1,
            end_line: 20,
            docstring: Some("Runs things.".into()),
            bases: vec![],
            decorators: vec![],
            methods: vec![public, private, dunder],
            class_variables: vec![("retries".into(), Some("int".into()))],
            is_dataclass: false,
            is_abstract: false,
        };

        let memory = build_component_memory(&class_info, "python");
        let MemoryFields::Component(fields) = &memory.fields else {
            panic!("expected a component");
        };
        let methods = fields.public_interface["methods"].as_array().unwrap();
        assert_eq!(methods.len(), 2);
        assert!(memory.content.starts_with("class Runner\nRuns things."));
    }
}
