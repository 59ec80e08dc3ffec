use crate::analytics::FleetAnalytics;
use crate::engine::now_ms;
use crate::fleet::Bus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_COMMAND_SIZE: usize = 512;
const MAX_ID_LEN: usize = 64;
const MAX_QUERY_LEN: usize = 64;

/// One newline-delimited JSON request from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: u32,
    pub timestamp: u64,
    pub command_type: CommandType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandType {
    Ping,
    ListRoutes,
    FleetSnapshot,
    RouteBuses { route_id: String },
    /// Case-insensitive match on bus id, route name or next stop. An empty
    /// query lists every bus (of `route_id`, when given).
    SearchBuses {
        #[serde(default)]
        query: String,
        #[serde(default)]
        route_id: Option<String>,
    },
    FleetAnalytics,
    EstimateEta { bus_id: String, stop_id: String },
    /// Start streaming a `TickUpdate` line after every tick.
    Subscribe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub id: u32,
    pub timestamp: u64,
    pub status: ResponseStatus,
    pub message: Option<String>,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    /// Well-formed request naming a bus, route or stop that does not exist.
    NotFound,
    Error,
    InvalidCommand,
}

/// Pushed to subscribers after every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickUpdate {
    pub sequence_number: u64,
    pub timestamp: u64,
    pub buses: Vec<Bus>,
    pub analytics: FleetAnalytics,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid JSON format: {0}")]
    InvalidJson(String),
    #[error("Message exceeds {} bytes", MAX_COMMAND_SIZE)]
    MessageTooLarge,
    #[error("Serialization failed: {0}")]
    SerializationError(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),
}

#[derive(Debug, Default)]
pub struct ProtocolHandler {
    sequence_counter: u64,
    command_counter: u32,
}

impl ProtocolHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_command(&mut self, json_str: &str) -> Result<Command, ProtocolError> {
        if json_str.len() > MAX_COMMAND_SIZE {
            return Err(ProtocolError::MessageTooLarge);
        }
        let command: Command =
            serde_json::from_str(json_str).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        self.validate_command(&command)?;
        self.command_counter = self.command_counter.wrapping_add(1);
        Ok(command)
    }

    pub fn validate_command(&self, command: &Command) -> Result<(), ProtocolError> {
        match &command.command_type {
            CommandType::RouteBuses { route_id } => check_id(route_id, "route_id"),
            CommandType::SearchBuses { query, route_id } => {
                if query.len() > MAX_QUERY_LEN {
                    return Err(ProtocolError::InvalidParameter("query"));
                }
                route_id.as_deref().map_or(Ok(()), |route_id| check_id(route_id, "route_id"))
            }
            CommandType::EstimateEta { bus_id, stop_id } => {
                check_id(bus_id, "bus_id")?;
                check_id(stop_id, "stop_id")
            }
            CommandType::Ping
            | CommandType::ListRoutes
            | CommandType::FleetSnapshot
            | CommandType::FleetAnalytics
            | CommandType::Subscribe => Ok(()),
        }
    }

    pub fn create_response(
        &self,
        command_id: u32,
        status: ResponseStatus,
        message: Option<&str>,
        payload: Option<serde_json::Value>,
    ) -> CommandResponse {
        CommandResponse {
            id: command_id,
            timestamp: now_ms(),
            status,
            message: message.map(ToString::to_string),
            payload,
        }
    }

    /// Success response carrying `payload` serialized as JSON.
    pub fn create_payload_response<T: Serialize + ?Sized>(
        &self,
        command_id: u32,
        payload: &T,
    ) -> Result<CommandResponse, ProtocolError> {
        let value = serde_json::to_value(payload)
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        Ok(self.create_response(command_id, ResponseStatus::Success, None, Some(value)))
    }

    pub fn create_error_response(&self, command_id: u32, error: &ProtocolError) -> CommandResponse {
        let status = match error {
            ProtocolError::SerializationError(_) => ResponseStatus::Error,
            _ => ResponseStatus::InvalidCommand,
        };
        self.create_response(command_id, status, Some(&error.to_string()), None)
    }

    pub fn serialize_response(&self, response: &CommandResponse) -> Result<String, ProtocolError> {
        serde_json::to_string(response).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn create_tick_update(&mut self, buses: Vec<Bus>, analytics: FleetAnalytics) -> TickUpdate {
        self.sequence_counter = self.sequence_counter.wrapping_add(1);
        TickUpdate {
            sequence_number: self.sequence_counter,
            timestamp: now_ms(),
            buses,
            analytics,
        }
    }

    pub fn serialize_update(&self, update: &TickUpdate) -> Result<String, ProtocolError> {
        serde_json::to_string(update).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn commands_parsed(&self) -> u32 {
        self.command_counter
    }
}

fn check_id(value: &str, field: &'static str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() || value.len() > MAX_ID_LEN {
        return Err(ProtocolError::InvalidParameter(field));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unit_command() {
        let mut handler = ProtocolHandler::new();
        let command = handler
            .parse_command(r#"{"id":1,"timestamp":1000,"command_type":"Ping"}"#)
            .unwrap();
        assert_eq!(command.command_type, CommandType::Ping);
        assert_eq!(handler.commands_parsed(), 1);
    }

    #[test]
    fn test_parse_struct_command() {
        let mut handler = ProtocolHandler::new();
        let command = handler
            .parse_command(
                r#"{"id":7,"timestamp":1,"command_type":{"EstimateEta":{"bus_id":"bus-1-1","stop_id":"stop-3"}}}"#,
            )
            .unwrap();
        assert_eq!(
            command.command_type,
            CommandType::EstimateEta { bus_id: "bus-1-1".into(), stop_id: "stop-3".into() }
        );
    }

    #[test]
    fn test_parse_search_command() {
        let mut handler = ProtocolHandler::new();
        let command = handler
            .parse_command(r#"{"id":4,"timestamp":1,"command_type":{"SearchBuses":{"query":"Mall"}}}"#)
            .unwrap();
        assert_eq!(command.command_type, CommandType::SearchBuses { query: "Mall".into(), route_id: None });

        let empty = handler
            .parse_command(
                r#"{"id":5,"timestamp":1,"command_type":{"SearchBuses":{"query":"","route_id":"route-2"}}}"#,
            )
            .unwrap();
        assert_eq!(
            empty.command_type,
            CommandType::SearchBuses { query: String::new(), route_id: Some("route-2".into()) }
        );

        let blank_route = handler.parse_command(
            r#"{"id":6,"timestamp":1,"command_type":{"SearchBuses":{"query":"x","route_id":""}}}"#,
        );
        assert_eq!(blank_route, Err(ProtocolError::InvalidParameter("route_id")));

        let long_query = format!(
            r#"{{"id":7,"timestamp":1,"command_type":{{"SearchBuses":{{"query":"{}"}}}}}}"#,
            "q".repeat(MAX_QUERY_LEN + 1)
        );
        assert_eq!(handler.parse_command(&long_query), Err(ProtocolError::InvalidParameter("query")));
    }

    #[test]
    fn test_rejects_oversized_message() {
        let mut handler = ProtocolHandler::new();
        let huge = "x".repeat(MAX_COMMAND_SIZE + 1);
        assert_eq!(handler.parse_command(&huge), Err(ProtocolError::MessageTooLarge));
    }

    #[test]
    fn test_rejects_blank_ids() {
        let mut handler = ProtocolHandler::new();
        let result = handler.parse_command(
            r#"{"id":2,"timestamp":1,"command_type":{"RouteBuses":{"route_id":"  "}}}"#,
        );
        assert_eq!(result, Err(ProtocolError::InvalidParameter("route_id")));
        assert_eq!(handler.commands_parsed(), 0);
    }

    #[test]
    fn test_invalid_json() {
        let mut handler = ProtocolHandler::new();
        assert!(matches!(handler.parse_command("{"), Err(ProtocolError::InvalidJson(_))));
    }

    #[test]
    fn test_error_response_status() {
        let handler = ProtocolHandler::new();
        let response = handler.create_error_response(3, &ProtocolError::MessageTooLarge);
        assert_eq!(response.status, ResponseStatus::InvalidCommand);
        assert!(response.message.unwrap().contains("512"));
    }

    #[test]
    fn test_tick_updates_are_sequenced() {
        let mut handler = ProtocolHandler::new();
        let analytics = crate::analytics::compute_analytics(&[], &[]);
        let first = handler.create_tick_update(Vec::new(), analytics.clone());
        let second = handler.create_tick_update(Vec::new(), analytics);
        assert_eq!(first.sequence_number + 1, second.sequence_number);

        let json = handler.serialize_update(&second).unwrap();
        assert!(json.contains("\"sequenceNumber\":2"));
    }
}
