//! Payloads JSON tels que les publient les agents, pour alimenter `MqttHub::handle_publish`.

use fleet_kernel::latency::LatencySample;
use fleet_kernel::models::{CommandId, CommandStatus, NodeStatus};
use serde_json::{json, Value};

pub struct AgentMessageBuilder;

impl AgentMessageBuilder {
    /// agents.registration@v1
    pub fn registration(node_id: &str, session_id: &str, hostname: &str) -> Value {
        json!({
            "node_id": node_id,
            "session_id": session_id,
            "hostname": hostname,
            "os": "linux",
            "architecture": "x86_64",
            "version": "0.1.0"
        })
    }

    /// agents.disconnect@v1
    pub fn disconnect(session_id: &str) -> Value {
        json!({ "session_id": session_id })
    }

    /// agents.heartbeat@v1, sondes réseau optionnelles
    pub fn heartbeat(node_id: &str, status: NodeStatus, latency: &[LatencySample]) -> Value {
        json!({
            "node_id": node_id,
            "status": status,
            "latency": latency,
        })
    }

    /// agents.response@v1
    pub fn response(command_id: CommandId, status: CommandStatus, result: Option<Value>, error: Option<&str>) -> Value {
        json!({
            "command_id": command_id,
            "status": status,
            "result": result,
            "error": error,
        })
    }

    pub fn to_bytes(value: &Value) -> Vec<u8> {
        value.to_string().into_bytes()
    }
}
