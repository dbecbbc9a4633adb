//! System prompt construction

use serde_json::Value;
use spool_agent::ToolRegistry;
use spool_ai::ToolProtocol;

/// Build the system prompt for the tools in `registry`.
///
/// Under the tagged protocol the prompt also teaches the markup, since the
/// model receives no structured tool definitions.
pub fn build_system_prompt(
    registry: &ToolRegistry,
    protocol: ToolProtocol,
    completion_tool: &str,
    custom: Option<&str>,
) -> String {
    let mut prompt = match custom {
        Some(text) => format!("{}\n\n", text.trim_end()),
        None => String::from(
            "You are spool, an assistant that completes tasks by calling tools.\n\n",
        ),
    };

    prompt.push_str("Guidelines:\n");
    prompt.push_str("- Every response must call at least one tool\n");
    prompt.push_str("- Read files before changing them\n");
    prompt.push_str(&format!(
        "- When the task is done, call {} with the final result\n\n",
        completion_tool
    ));

    if protocol == ToolProtocol::Tagged {
        prompt.push_str(&tagged_instructions(registry));
    } else {
        prompt.push_str("Tools:\n");
        for tool in registry.iter() {
            prompt.push_str(&format!("- {}: {}\n", tool.name(), tool.description()));
        }
    }

    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| ".".to_string());
    prompt.push_str(&format!("\nCurrent working directory: {}", cwd));

    prompt
}

fn tagged_instructions(registry: &ToolRegistry) -> String {
    let mut out = String::from(
        "Tool use is formatted with XML-style tags. The tool name is the outer tag and each \
         parameter is an inner tag:\n\n\
         <tool_name>\n<parameter_name>value</parameter_name>\n</tool_name>\n\n\
         Use one or more tool calls per response. Parameter values are plain text.\n\n\
         # Tools\n",
    );

    for tool in registry.iter() {
        out.push_str(&format!("\n## {}\n{}\n", tool.name(), tool.description()));

        let schema = tool.parameters_schema();
        let required = required_params(&schema);
        let properties = schema.get("properties").and_then(Value::as_object);

        let mut example = format!("<{}>\n", tool.name());
        if let Some(properties) = properties.filter(|p| !p.is_empty()) {
            out.push_str("Parameters:\n");
            for (name, property) in properties {
                let description = property.get("description").and_then(Value::as_str).unwrap_or("");
                let marker = if required.contains(&name.as_str()) {
                    "required"
                } else {
                    "optional"
                };
                out.push_str(&format!("- {} ({}): {}\n", name, marker, description));
            }
        }
        for name in &required {
            example.push_str(&format!("<{0}>...</{0}>\n", name));
        }
        example.push_str(&format!("</{}>", tool.name()));
        out.push_str(&format!("Usage:\n{}\n", example));
    }
    out
}

fn required_params(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}
