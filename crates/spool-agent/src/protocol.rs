//! Per-turn tool protocol selection

use serde::{Deserialize, Serialize};
use spool_ai::{ModelInfo, ToolProtocol};

/// Configured tool protocol preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolPreference {
    /// Native when the model supports it, tagged otherwise
    #[default]
    Auto,
    Native,
    Tagged,
}

impl std::str::FromStr for ProtocolPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ProtocolPreference::Auto),
            "native" => Ok(ProtocolPreference::Native),
            "tagged" | "xml" => Ok(ProtocolPreference::Tagged),
            other => Err(format!("unknown tool protocol: {}", other)),
        }
    }
}

/// Resolve the protocol for one turn from the preference and the model's capabilities
pub fn select_protocol(preference: ProtocolPreference, model: &ModelInfo) -> ToolProtocol {
    let native = model.capabilities.native_tool_calls;
    match preference {
        ProtocolPreference::Tagged => ToolProtocol::Tagged,
        ProtocolPreference::Native if native => ToolProtocol::Native,
        ProtocolPreference::Native => {
            tracing::warn!(model = %model.id, "model lacks native tool calls, using tagged protocol");
            ToolProtocol::Tagged
        }
        ProtocolPreference::Auto if native => ToolProtocol::Native,
        ProtocolPreference::Auto => ToolProtocol::Tagged,
    }
}
