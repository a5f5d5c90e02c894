// Result Output Writer
// Writes the final matrix, or the failure message, as a JSON document

use crate::memory::MatrixData;

use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

#[derive(Serialize)]
struct ResultDocument<'a> {
    result: &'a MatrixData,
}

#[derive(Serialize)]
struct ErrorDocument<'a> {
    error: &'a str,
}

/// Writer for `{"result": ...}` and `{"error": ...}` documents.
///
/// With no destination the document goes to stdout.
pub struct OutputWriter;

impl OutputWriter {
    pub fn write_result(result: &MatrixData, destination: Option<&Path>) -> io::Result<()> {
        Self::write(&ResultDocument { result }, destination)
    }

    pub fn write_error(message: &str, destination: Option<&Path>) -> io::Result<()> {
        Self::write(&ErrorDocument { error: message }, destination)
    }

    /// Render a result document without writing it
    pub fn render_result(result: &MatrixData) -> io::Result<String> {
        Ok(serde_json::to_string_pretty(&ResultDocument { result })?)
    }

    fn write<T: Serialize>(document: &T, destination: Option<&Path>) -> io::Result<()> {
        let mut json = serde_json::to_string_pretty(document)?;
        json.push('\n');
        match destination {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, json)
            }
            None => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(json.as_bytes())?;
                stdout.flush()
            }
        }
    }
}
