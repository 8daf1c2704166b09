//! Fixed catalog of tools exposed to external callers.
//!
//! Every tool maps onto an action the dispatcher already understands, so a
//! tool invocation runs exactly the same code path as a model decision.

use serde::Serialize;
use serde_json::{Value, json};

use crate::agent::{Builtin, Decision};
use crate::tools::ToolError;

/// Definition of a tool's input using JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCatalog {
    tools: Vec<ToolSpec>,
}

fn string_arg(name: &str, description: &str) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert(
        name.to_string(),
        json!({ "type": "string", "description": description }),
    );
    json!({
        "type": "object",
        "properties": properties,
        "required": [name]
    })
}

fn no_args() -> Value {
    json!({ "type": "object", "properties": {} })
}

impl ToolCatalog {
    pub fn new() -> Self {
        let tools = vec![
            ToolSpec {
                name: "run_command",
                description: "Run a shell command on the host and return its output",
                input_schema: string_arg("command", "The shell command to run"),
            },
            ToolSpec {
                name: "get_system_stats",
                description: "Get current CPU, RAM and disk usage",
                input_schema: no_args(),
            },
            ToolSpec {
                name: "get_top_processes",
                description: "Get the processes using the most CPU",
                input_schema: no_args(),
            },
            ToolSpec {
                name: "read_file",
                description: "Read the first lines of a file",
                input_schema: string_arg("path", "Path to the file, ~ allowed"),
            },
            ToolSpec {
                name: "list_files",
                description: "List files and folders in a directory",
                input_schema: string_arg("path", "Path to the directory, ~ allowed"),
            },
            ToolSpec {
                name: "web_search",
                description: "Search the web and summarize the results",
                input_schema: string_arg("query", "What to search for"),
            },
            ToolSpec {
                name: "run_python",
                description: "Save Python code to the workspace and run it",
                input_schema: string_arg("code", "Python source"),
            },
            ToolSpec {
                name: "use_plugin",
                description: "Invoke a registered plugin by name",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "plugin": { "type": "string", "description": "Plugin name, e.g. NOTES" },
                        "input": { "type": "string", "description": "Text passed to the plugin" }
                    },
                    "required": ["plugin"]
                }),
            },
        ];
        Self { tools }
    }

    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Translate a tool call into the decision the dispatcher will run.
    pub fn to_decision(&self, name: &str, args: &Value) -> Result<Decision, ToolError> {
        let required = |key: &str| -> Result<String, ToolError> {
            args.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{}' parameter", key)))
        };

        let decision = match name {
            "run_command" => Decision::new(Builtin::RunCommand.action(), required("command")?),
            "get_system_stats" => Decision::new(Builtin::GetStats.action(), ""),
            "get_top_processes" => Decision::new(Builtin::GetProcesses.action(), ""),
            "read_file" => Decision::new(Builtin::FileRead.action(), required("path")?),
            "list_files" => Decision::new(Builtin::FileList.action(), required("path")?),
            "web_search" => Decision::new(Builtin::WebSearch.action(), required("query")?),
            "run_python" => Decision::new(Builtin::WriteAndRunCode.action(), required("code")?),
            "use_plugin" => {
                let plugin = required("plugin")?;
                let input = args
                    .get("input")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Decision::new(plugin, input)
            }
            other => return Err(ToolError::NotFound(format!("unknown tool {}", other))),
        };
        Ok(decision)
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_catalog_names() {
        let catalog = ToolCatalog::new();
        let names: Vec<_> = catalog.tools().iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "run_command",
                "get_system_stats",
                "get_top_processes",
                "read_file",
                "list_files",
                "web_search",
                "run_python",
                "use_plugin"
            ]
        );
    }

    #[test]
    fn test_schemas_are_objects() {
        for tool in ToolCatalog::new().tools() {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        }
    }

    #[test]
    fn test_to_decision() {
        let catalog = ToolCatalog::new();

        let d = catalog
            .to_decision("run_command", &json!({"command": "uptime"}))
            .unwrap();
        assert_eq!(d, Decision::new("RUN_COMMAND", "uptime"));

        let d = catalog
            .to_decision("use_plugin", &json!({"plugin": "NOTES", "input": "show"}))
            .unwrap();
        assert_eq!(d, Decision::new("NOTES", "show"));
    }

    #[test]
    fn test_missing_argument() {
        let err = ToolCatalog::new()
            .to_decision("read_file", &json!({}))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }

    #[test]
    fn test_unknown_tool() {
        let err = ToolCatalog::new().to_decision("format_disk", &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
