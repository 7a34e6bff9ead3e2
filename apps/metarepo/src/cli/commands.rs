//! # CLI Command Implementations

use crate::api::{self, AppState, parse_operation};
use crate::config::{Backend, Config};
use metarepo_core::{
    Document, EntityRecord, Guid, HistoryEntry, InstanceHeader, MetarepoError, Operation,
    OperationResult, Relationship, Repository, TxOutcome,
};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Maximum size of a request file for `apply` (16 MB).
const MAX_REQUEST_FILE_SIZE: u64 = 16 * 1024 * 1024;

// =============================================================================
// OUTPUT
// =============================================================================

fn print_json(value: &impl Serialize) -> Result<(), MetarepoError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| MetarepoError::Serialization(format!("Encode output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

fn describe(header: &InstanceHeader) -> String {
    format!(
        "{} {} v{} [{}] home {}",
        header.instance_type.type_def_name,
        header.guid,
        header.version(),
        header.status,
        header.metadata_collection_id
    )
}

fn describe_document(document: &Document) -> String {
    let kind = match document {
        Document::Entity(_) => "entity",
        Document::Proxy(_) => "proxy",
        Document::Relationship(_) => "relationship",
    };
    format!("{:<12} {}", kind, describe(document.header()))
}

fn describe_outcome(outcome: &TxOutcome) -> String {
    let result = match &outcome.result {
        OperationResult::Entity(entity) => format!("entity {}", describe(&entity.header)),
        OperationResult::Proxy(proxy) => format!("proxy {}", describe(&proxy.header)),
        OperationResult::Relationship(relationship) => {
            format!("relationship {}", describe(&relationship.header))
        }
        OperationResult::Purged { guid } => format!("purged {}", guid),
    };
    match &outcome.commit {
        Some(commit) => format!(
            "tx {}: {} (sequence {}, {} puts, {} evictions)",
            outcome.tx_id, result, commit.sequence, commit.puts, commit.evictions
        ),
        None => format!("tx {}: {} (nothing written)", outcome.tx_id, result),
    }
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(config: &Config, host: &str, port: u16) -> Result<(), MetarepoError> {
    let repository = config.open_repository()?;

    println!("Metarepo Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:       {}", host);
    println!("  Port:       {}", port);
    println!("  Collection: {}", config.repository.metadata_collection_id);
    println!("  Backend:    {}", config.storage.backend);
    if config.storage.backend == Backend::Redb {
        println!("  Database:   {:?}", config.storage.path);
    }
    println!();
    println!("Endpoints:");
    println!("  POST /transaction                  - Run one operation");
    println!("  GET  /entity/{{guid}}                - Current entity");
    println!("  GET  /entity/{{guid}}/relationships  - Attached relationships");
    println!("  GET  /relationship/{{guid}}          - Current relationship");
    println!("  GET  /history/{{guid}}               - Stored versions");
    println!("  GET  /health                       - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let state = AppState::new(repository, config.repository.default_user.clone());
    api::run_server(&format!("{}:{}", host, port), state).await
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show repository identity and store sequence.
pub fn cmd_status(config: &Config, json_mode: bool) -> Result<(), MetarepoError> {
    let repository = config.open_repository()?;
    let identity = repository.identity();
    let sequence = repository.sequence()?;

    if json_mode {
        return print_json(&serde_json::json!({
            "metadata_collection_id": identity.metadata_collection_id,
            "metadata_collection_name": identity.metadata_collection_name,
            "backend": config.storage.backend.to_string(),
            "database": config.storage.path.to_string_lossy(),
            "sequence": sequence,
        }));
    }

    println!("Metarepo Status");
    println!("===============");
    println!("Collection: {}", identity.metadata_collection_id);
    println!("Name:       {}", identity.metadata_collection_name);
    println!("Backend:    {}", config.storage.backend);
    println!("Database:   {:?}", config.storage.path);
    println!("Sequence:   {}", sequence);
    Ok(())
}

// =============================================================================
// TYPES COMMAND
// =============================================================================

/// List the loaded type definitions.
pub fn cmd_types(config: &Config, json_mode: bool) -> Result<(), MetarepoError> {
    let catalog = config.load_types()?;

    if json_mode {
        let types: Vec<_> = catalog.iter().collect();
        return print_json(&types);
    }

    println!("{} type definitions", catalog.len());
    for def in catalog.iter() {
        let parent = def
            .super_type
            .as_deref()
            .map(|name| format!(" extends {}", name))
            .unwrap_or_default();
        println!(
            "  {:<14} {}{} ({} attributes)",
            format!("{:?}", def.category),
            def.name,
            parent,
            def.attributes.len()
        );
    }
    Ok(())
}

// =============================================================================
// APPLY COMMAND
// =============================================================================

/// Read the operation requests held in `file`: one object or an array.
pub fn read_requests(file: &Path) -> Result<Vec<Operation>, MetarepoError> {
    let metadata = std::fs::metadata(file).map_err(|e| {
        MetarepoError::Storage(format!("Cannot read '{}': {}", file.display(), e))
    })?;
    if metadata.len() > MAX_REQUEST_FILE_SIZE {
        return Err(MetarepoError::InvalidParameter(format!(
            "Request file is {} bytes, maximum is {}",
            metadata.len(),
            MAX_REQUEST_FILE_SIZE
        )));
    }
    let text = std::fs::read_to_string(file)
        .map_err(|e| MetarepoError::Storage(format!("Cannot read '{}': {}", file.display(), e)))?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| MetarepoError::InvalidParameter(format!("Invalid JSON: {}", e)))?;

    let requests = match value {
        Value::Array(requests) => requests,
        request => vec![request],
    };
    requests
        .into_iter()
        .map(|request| parse_operation(request).map_err(MetarepoError::InvalidParameter))
        .collect()
}

/// Run each request in `file` as its own transaction, stopping at the first
/// rejection.
pub fn cmd_apply(
    config: &Config,
    json_mode: bool,
    file: &Path,
    user: &str,
) -> Result<(), MetarepoError> {
    let operations = read_requests(file)?;
    if config.storage.backend == Backend::Memory {
        tracing::warn!("In-memory backend: applied operations are discarded on exit");
    }
    let mut repository = config.open_repository()?;

    let mut outcomes = Vec::with_capacity(operations.len());
    for operation in operations {
        let outcome = repository
            .execute(user, crate::transaction_time(), operation)
            .map_err(|e| e.source)?;
        if !json_mode {
            println!("{}", describe_outcome(&outcome));
        }
        outcomes.push(outcome);
    }

    if json_mode {
        print_json(&outcomes)?;
    }
    Ok(())
}

// =============================================================================
// READ COMMANDS
// =============================================================================

fn print_entity(entity: &EntityRecord, json_mode: bool) -> Result<(), MetarepoError> {
    if json_mode {
        return print_json(entity);
    }
    let kind = if entity.is_proxy() { "proxy" } else { "entity" };
    println!("{} {}", kind, describe(entity.header()));
    if let EntityRecord::Detail(detail) = entity {
        for (name, value) in detail.properties.iter() {
            println!("  {} = {:?}", name, value);
        }
    }
    for classification in entity.classifications() {
        println!("  classified {}", classification.name);
    }
    Ok(())
}

fn print_relationship(relationship: &Relationship, json_mode: bool) -> Result<(), MetarepoError> {
    if json_mode {
        return print_json(relationship);
    }
    println!("relationship {}", describe(&relationship.header));
    let (one, two) = relationship.ends()?;
    println!("  ends {} <-> {}", one, two);
    for (name, value) in relationship.properties.iter() {
        println!("  {} = {:?}", name, value);
    }
    Ok(())
}

/// Show the current state of an entity or relationship.
pub fn cmd_get(
    config: &Config,
    json_mode: bool,
    guid: &str,
    relationship: bool,
) -> Result<(), MetarepoError> {
    let repository = config.open_repository()?;
    let guid = Guid::from(guid);
    if relationship {
        let found = repository
            .relationship(&guid)?
            .ok_or(MetarepoError::RelationshipNotKnown(guid))?;
        print_relationship(&found, json_mode)
    } else {
        let found = repository
            .entity(&guid)?
            .ok_or(MetarepoError::EntityNotKnown(guid))?;
        print_entity(&found, json_mode)
    }
}

/// Show up to `limit` stored versions, newest first.
pub fn cmd_history(
    config: &Config,
    json_mode: bool,
    guid: &str,
    limit: usize,
) -> Result<(), MetarepoError> {
    let repository = config.open_repository()?;
    let versions: Vec<HistoryEntry> = repository.history(&Guid::from(guid), limit)?;

    if json_mode {
        return print_json(&versions);
    }
    if versions.is_empty() {
        println!("No history for {}", guid);
        return Ok(());
    }
    for entry in &versions {
        println!(
            "#{:<6} tx {} valid {}  {}",
            entry.sequence,
            entry.tx_time.0,
            entry.valid_time.0,
            describe_document(&entry.document)
        );
    }
    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create an empty database at the configured path.
pub fn cmd_init(config: &Config, force: bool) -> Result<(), MetarepoError> {
    if config.storage.backend == Backend::Memory {
        println!("In-memory backend configured, nothing to initialize");
        return Ok(());
    }

    let path = &config.storage.path;
    if path.exists() {
        if !force {
            return Err(MetarepoError::InvalidParameter(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(path).map_err(|e| {
            MetarepoError::Storage(format!("Cannot remove '{}': {}", path.display(), e))
        })?;
    }

    let repository: Repository = config.open_repository()?;
    println!(
        "Initialized new redb database at {:?} for collection {}",
        path,
        repository.identity().metadata_collection_id
    );
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
