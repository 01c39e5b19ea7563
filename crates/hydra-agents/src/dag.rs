//! Task-DAG input files.
//!
//! Either a bare JSON array of tasks or an object with a `tasks` array:
//!
//! ```json
//! {"tasks": [
//!   {"id": "schema", "title": "Schema", "description": "Design the tables"},
//!   {"id": "api", "title": "API", "description": "CRUD endpoints",
//!    "dependencies": ["schema"], "metadata": {"language": "python"}}
//! ]}
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use hydra_coordination::task::{Task, TaskGraph, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum DagError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed task file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Task file contains no tasks")]
    Empty,

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DagFile {
    Wrapped { tasks: Vec<Task> },
    List(Vec<Task>),
}

/// Parse and validate a DAG document
pub fn parse_dag(raw: &str) -> Result<Vec<Task>, DagError> {
    let tasks = match serde_json::from_str::<DagFile>(raw) {
        Ok(DagFile::Wrapped { tasks }) | Ok(DagFile::List(tasks)) => tasks,
        // Untagged errors say nothing useful; re-parse for the real one
        Err(_) => serde_json::from_str::<Vec<Task>>(raw)?,
    };
    if tasks.is_empty() {
        return Err(DagError::Empty);
    }
    TaskGraph::validate(&tasks)?;
    Ok(tasks)
}

/// Read and validate a DAG file
pub fn load_dag(path: impl AsRef<Path>) -> Result<Vec<Task>, DagError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| DagError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_dag(&raw)
}
