//! Output formatting: JSON or plain lines, one record per requested key.

use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;

use gather_core::{Key, KeyResult};

use crate::cli::OutputFormat;

/// One key and what it resolved to.
#[derive(Debug, Serialize)]
pub struct KeyOutcome<'a> {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<'a> KeyOutcome<'a> {
    pub fn new(key: &Key, result: &'a KeyResult<Value>) -> Self {
        match result {
            Ok(value) => Self {
                key: key.to_string(),
                value: Some(value.as_ref()),
                error: None,
            },
            Err(e) => Self {
                key: key.to_string(),
                value: None,
                error: Some(e.to_string()),
            },
        }
    }
}

pub fn render_outcomes(format: OutputFormat, outcomes: &[KeyOutcome<'_>]) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(outcomes),
        OutputFormat::JsonCompact => serde_json::to_string(outcomes),
        OutputFormat::Plain => {
            let mut lines = Vec::with_capacity(outcomes.len());
            for outcome in outcomes {
                let detail = match (outcome.value, &outcome.error) {
                    (Some(value), _) => serde_json::to_string(value)?,
                    (None, Some(error)) => format!("error: {error}"),
                    (None, None) => String::new(),
                };
                lines.push(format!("{}\t{detail}", outcome.key));
            }
            Ok(lines.join("\n"))
        }
    }
}

/// Print the rendered output to stdout.
pub fn print_output(output: &str) -> io::Result<()> {
    if output.is_empty() {
        return Ok(());
    }
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{output}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use gather_core::FetchError;
    use serde_json::json;

    use super::*;

    #[test]
    fn plain_output_has_one_line_per_key() {
        let ok: KeyResult<Value> = Ok(Arc::new(json!({ "id": "a" })));
        let missing: KeyResult<Value> = Err(FetchError::NotFound { key: "b".into() });
        let outcomes = [
            KeyOutcome::new(&Key::id("a"), &ok),
            KeyOutcome::new(&Key::id("b"), &missing),
        ];

        let text = render_outcomes(OutputFormat::Plain, &outcomes).unwrap();
        assert_eq!(text, "a\t{\"id\":\"a\"}\nb\terror: Not found: b");
    }

    #[test]
    fn json_output_omits_absent_fields() {
        let ok: KeyResult<Value> = Ok(Arc::new(json!(1)));
        let outcomes = [KeyOutcome::new(&Key::id("a"), &ok)];
        let text = render_outcomes(OutputFormat::JsonCompact, &outcomes).unwrap();
        assert_eq!(text, r#"[{"key":"a","value":1}]"#);
    }
}
