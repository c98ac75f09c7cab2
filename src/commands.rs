//! Command execution.

use crate::config::Config;
use crate::{Commands, InputArgs};
use colored::Colorize;
use flowmark_core::{export, validate, AuditSink, Definition, DefinitionRaw, Engine, ExportFormat};
use flowmark_storage::{DefinitionLoader, FileAuditTrail};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

type CommandResult = Result<String, Box<dyn std::error::Error>>;

/// Validation found undeclared endpoints or an unbuildable definition.
#[derive(Debug)]
pub struct ValidationFailed(pub Vec<String>);

impl fmt::Display for ValidationFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "workflow validation failed:")?;
        for error in &self.0 {
            write!(f, "\n   - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailed {}

/// Executes a command and returns the formatted output.
pub fn execute(cmd: Commands, config: &Config) -> CommandResult {
    match cmd {
        Commands::Validate { source } => {
            let raw = load_raw(&source, config)?;
            let errors = validate(&raw);
            if !errors.is_empty() {
                return Err(ValidationFailed(errors).into());
            }

            let definition =
                Definition::from_raw(raw).map_err(|e| ValidationFailed(vec![e.to_string()]))?;
            Ok(format!(
                "{} workflow {} (checksum: {})",
                "Valid".green(),
                definition.name.cyan(),
                definition.checksum
            ))
        }

        Commands::Export {
            source,
            output,
            format,
        } => {
            let format: ExportFormat = format.parse()?;
            let definition = load_definition(&source, config)?;
            std::fs::write(&output, export(&definition, format))?;

            tracing::info!("Exported workflow '{}' to {}", definition.name, output.display());

            Ok(format!(
                "{} workflow {} to {}",
                "Exported".green(),
                definition.name.cyan(),
                output.display()
            ))
        }

        Commands::Transitions { source, state } => {
            let definition = load_definition(&source, config)?;
            let available = definition.available_for(&state);

            if available.is_empty() {
                return Ok(format!(
                    "No transitions available from {}",
                    state.join(", ")
                )
                .yellow()
                .to_string());
            }

            let mut output = String::new();
            for id in available {
                if let Some(transition) = definition.transition(id) {
                    output.push_str(&format!(
                        "  {} {} -> {}\n",
                        id.cyan(),
                        transition.from.ids().join(", "),
                        transition.to.ids().join(", ").yellow()
                    ));
                }
            }
            Ok(output.trim_end().to_string())
        }

        Commands::Apply {
            source,
            entity,
            transition,
        } => {
            let definition = load_definition(&source, config)?;
            let audit = Arc::new(FileAuditTrail::open(&config.storage.audit_dir)?);
            let engine: Engine<Value> = Engine::new(definition)?.with_audit(audit);

            let mut record = read_entity(&entity)?;
            if engine.initialize(&mut record) {
                tracing::info!("Initialized entity {} with initial marking", entity.display());
            }

            let result = engine.apply(&mut record, &transition)?;
            std::fs::write(&entity, serde_json::to_string_pretty(&record)?)?;

            Ok(format!(
                "{} transition {}\n  {} -> {}",
                "Applied".green(),
                result.transition.cyan(),
                result.from_states.join(", "),
                result.to_states.join(", ").yellow()
            ))
        }

        Commands::History {
            workflow,
            entity_id,
        } => {
            let trail = FileAuditTrail::open(&config.storage.audit_dir)?;
            let entries = trail.history(&workflow, &entity_id)?;

            if entries.is_empty() {
                return Ok(format!("No audit trail for {} in {}", entity_id, workflow)
                    .yellow()
                    .to_string());
            }

            let mut output = format!("Audit trail for {} in {}", entity_id.cyan(), workflow)
                .bold()
                .to_string();
            for entry in entries {
                output.push_str(&format!(
                    "\n  {} {:<10} {} [{}] -> [{}]",
                    entry.timestamp.dimmed(),
                    entry.event_type.as_str(),
                    entry.transition.cyan(),
                    entry.from_state.join(", "),
                    entry.to_state.ids().join(", ")
                ));
            }
            Ok(output)
        }

        Commands::ClearHistory {
            workflow,
            entity_id,
        } => {
            let trail = FileAuditTrail::open(&config.storage.audit_dir)?;
            trail.clear_history(&workflow, &entity_id)?;
            Ok(format!(
                "{} audit trail for {} in {}",
                "Cleared".green(),
                entity_id.cyan(),
                workflow
            ))
        }
    }
}

/// Loads the raw definition document from whichever source was given.
fn load_raw(source: &InputArgs, config: &Config) -> Result<DefinitionRaw, Box<dyn std::error::Error>> {
    if let Some(json) = &source.json {
        return DefinitionRaw::from_json_str(json)
            .map_err(|_| "Invalid JSON string provided.".into());
    }
    if let Some(path) = &source.input {
        return Ok(DefinitionLoader::load_raw_path(path)?);
    }
    if let Some(name) = &source.workflow {
        let loader = DefinitionLoader::new(&config.storage.workflows_dir);
        return Ok(loader.load_raw(name)?);
    }
    Err("either --input, --json or --workflow must be provided".into())
}

fn load_definition(
    source: &InputArgs,
    config: &Config,
) -> Result<Definition, Box<dyn std::error::Error>> {
    Ok(Definition::from_raw(load_raw(source, config)?)?)
}

fn read_entity(path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content)?;
    if !value.is_object() {
        return Err(format!("entity file {} must contain a JSON object", path.display()).into());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const ORDER_JSON: &str = r#"{
        "name": "Order Processing",
        "type": "workflow",
        "auditTrail": {"enabled": true},
        "initialState": ["draft"],
        "places": {"draft": {}, "pending": {}, "confirmed": {}},
        "transitions": {
            "initiate": {"from": ["draft"], "to": ["pending"]},
            "confirm": {"from": "pending", "to": "confirmed"}
        }
    }"#;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            storage: StorageConfig {
                workflows_dir: dir.path().join("workflows"),
                audit_dir: dir.path().join("audit"),
            },
        }
    }

    fn json_source(json: &str) -> InputArgs {
        InputArgs {
            input: None,
            json: Some(json.to_string()),
            workflow: None,
        }
    }

    #[test]
    fn test_validate_ok() {
        let dir = TempDir::new().unwrap();
        let output = execute(
            Commands::Validate {
                source: json_source(ORDER_JSON),
            },
            &test_config(&dir),
        )
        .unwrap();
        assert!(output.contains("Order Processing"));
    }

    #[test]
    fn test_validate_reports_undefined_states() {
        let dir = TempDir::new().unwrap();
        let json = r#"{
            "name": "orders",
            "places": {"draft": {}},
            "transitions": {"initiate": {"from": ["draft"], "to": ["pending"]}}
        }"#;

        let err = execute(
            Commands::Validate {
                source: json_source(json),
            },
            &test_config(&dir),
        )
        .unwrap_err();

        let failed = err.downcast_ref::<ValidationFailed>().unwrap();
        assert_eq!(
            failed.0,
            vec!["Transition \"initiate\" results in undefined state \"pending\".".to_string()]
        );
    }

    #[test]
    fn test_invalid_json_string() {
        let dir = TempDir::new().unwrap();
        let err = execute(
            Commands::Validate {
                source: json_source("{not json"),
            },
            &test_config(&dir),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid JSON string provided.");
    }

    #[test]
    fn test_export_dot_and_mermaid() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let dot = dir.path().join("workflow.dot");
        execute(
            Commands::Export {
                source: json_source(ORDER_JSON),
                output: dot.clone(),
                format: "dot".to_string(),
            },
            &config,
        )
        .unwrap();
        let content = std::fs::read_to_string(&dot).unwrap();
        assert!(content.starts_with("digraph Workflow {\n"));
        assert!(content.contains("\"draft\" -> \"pending\" [label=\"initiate\"];"));

        let md = dir.path().join("workflow.md");
        execute(
            Commands::Export {
                source: json_source(ORDER_JSON),
                output: md.clone(),
                format: "md".to_string(),
            },
            &config,
        )
        .unwrap();
        let content = std::fs::read_to_string(&md).unwrap();
        assert!(content.contains("    pending -->|confirm| confirmed;"));
    }

    #[test]
    fn test_export_rejects_unknown_format() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("workflow.svg");
        let result = execute(
            Commands::Export {
                source: json_source(ORDER_JSON),
                output: output.clone(),
                format: "svg".to_string(),
            },
            &test_config(&dir),
        );
        assert!(result.is_err());
        assert!(!output.exists());
    }

    #[test]
    fn test_transitions_by_workflow_name() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        std::fs::create_dir_all(&config.storage.workflows_dir).unwrap();
        std::fs::write(config.storage.workflows_dir.join("orders.json"), ORDER_JSON).unwrap();

        let output = execute(
            Commands::Transitions {
                source: InputArgs {
                    input: None,
                    json: None,
                    workflow: Some("orders".to_string()),
                },
                state: vec!["pending".to_string()],
            },
            &config,
        )
        .unwrap();
        assert!(output.contains("confirm"));
        assert!(!output.contains("initiate"));
    }

    #[test]
    fn test_apply_history_and_clear() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let definition_path = dir.path().join("orders.json");
        std::fs::write(&definition_path, ORDER_JSON).unwrap();
        let entity_path = dir.path().join("order-1.json");
        std::fs::write(&entity_path, json!({"id": 1}).to_string()).unwrap();

        let source = InputArgs {
            input: Some(definition_path),
            json: None,
            workflow: None,
        };
        execute(
            Commands::Apply {
                source,
                entity: entity_path.clone(),
                transition: "initiate".to_string(),
            },
            &config,
        )
        .unwrap();

        let entity: Value =
            serde_json::from_str(&std::fs::read_to_string(&entity_path).unwrap()).unwrap();
        assert_eq!(entity["state"], json!(["pending"]));

        let audit_file: PathBuf = config.storage.audit_dir.join("order-processing-1.json");
        assert!(audit_file.exists());

        let output = execute(
            Commands::History {
                workflow: "Order Processing".to_string(),
                entity_id: "1".to_string(),
            },
            &config,
        )
        .unwrap();
        assert!(output.contains("ANNOUNCE"));
        assert!(output.contains("ENTERED"));

        execute(
            Commands::ClearHistory {
                workflow: "Order Processing".to_string(),
                entity_id: "1".to_string(),
            },
            &config,
        )
        .unwrap();
        assert!(!audit_file.exists());
    }

    #[test]
    fn test_apply_rejects_invalid_transition() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let entity_path = dir.path().join("order-2.json");
        let original = json!({"id": 2, "state": ["draft"]}).to_string();
        std::fs::write(&entity_path, &original).unwrap();

        let err = execute(
            Commands::Apply {
                source: json_source(ORDER_JSON),
                entity: entity_path.clone(),
                transition: "confirm".to_string(),
            },
            &config,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not allowed"));
        assert_eq!(std::fs::read_to_string(&entity_path).unwrap(), original);
    }
}
