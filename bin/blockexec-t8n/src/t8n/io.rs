use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};

use crate::t8n::{Result, StdinInput, T8nError, TransitionInputs};

/// Input and output name that stands for the standard streams.
pub const STDIN: &str = "stdin";

/// Loads and parses a JSON file.
pub fn load_json<T: DeserializeOwned>(path: &str) -> Result<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| T8nError::InputLoad { file: path.to_string(), source: e })?;
    serde_json::from_str(&content)
        .map_err(|e| T8nError::JsonParse { file: path.to_string(), source: e })
}

/// Load inputs from stdin in combined JSON format
pub fn load_from_stdin() -> Result<TransitionInputs> {
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .map_err(|e| T8nError::InputLoad { file: STDIN.to_string(), source: e })?;
    let input: StdinInput = serde_json::from_str(&buffer)
        .map_err(|e| T8nError::JsonParse { file: STDIN.to_string(), source: e })?;
    Ok(input.into())
}

/// Writes `value` as pretty JSON to `target`: `stdout`, `stderr` or a file under `basedir`.
pub fn write_json<T: Serialize>(value: &T, target: &str, basedir: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| T8nError::JsonParse { file: target.to_string(), source: e })?;
    match target {
        "stdout" => println!("{json}"),
        "stderr" => eprintln!("{json}"),
        file => {
            let path = basedir.map_or_else(|| PathBuf::from(file), |dir| dir.join(file));
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| T8nError::OutputWrite {
                    file: parent.display().to_string(),
                    source: e,
                })?;
            }
            fs::write(&path, json).map_err(|e| T8nError::OutputWrite {
                file: path.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}
