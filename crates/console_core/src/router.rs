use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::events::{ConsoleEvent, LogLevel, PacketKind};

/// Routing action for a known field path. Anything not in the table takes
/// the default field-update path; there is no reflective dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    InfoLine,
    ErrorLine,
    LoraPacket,
    IridiumPacket,
}

pub struct MessageRouter {
    routes: HashMap<&'static str, Route>,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRouter {
    pub fn new() -> Self {
        let mut routes = HashMap::new();
        routes.insert("info", Route::InfoLine);
        routes.insert("error", Route::ErrorLine);
        routes.insert("lora/msg", Route::LoraPacket);
        routes.insert("rb/msg", Route::IridiumPacket);
        Self { routes }
    }

    pub fn dispatch(
        &self,
        key: &str,
        value: &Value,
        readout: &mut DeviceReadout,
        events: &broadcast::Sender<ConsoleEvent>,
    ) {
        match self.routes.get(key) {
            Some(Route::InfoLine) => {
                let _ = events.send(ConsoleEvent::Log {
                    level: LogLevel::Info,
                    message: value_text(value),
                });
            }
            Some(Route::ErrorLine) => {
                let _ = events.send(ConsoleEvent::Log {
                    level: LogLevel::Error,
                    message: value_text(value),
                });
            }
            Some(Route::LoraPacket) => {
                let _ = events.send(ConsoleEvent::Packet {
                    kind: PacketKind::Lora,
                    body: value_text(value),
                });
            }
            Some(Route::IridiumPacket) => {
                // Iridium payloads arrive structured; render compact JSON.
                let _ = events.send(ConsoleEvent::Packet {
                    kind: PacketKind::Iridium,
                    body: value.to_string(),
                });
            }
            None => {
                readout.record(key, value);
                let _ = events.send(ConsoleEvent::FieldChanged {
                    field: key.split('/').collect::<Vec<_>>().join("_"),
                    value: value.clone(),
                });
            }
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubsystemReadout {
    pub running: Option<bool>,
    pub enabled: Option<bool>,
}

/// Explicit device state owned by the session and written only by the
/// router. Dependent logic reads this, never rendered output.
#[derive(Debug, Default, Clone)]
pub struct DeviceReadout {
    pub gps: SubsystemReadout,
    pub iridium: SubsystemReadout,
    pub lora: SubsystemReadout,
    fields: HashMap<String, Value>,
}

impl DeviceReadout {
    fn record(&mut self, key: &str, value: &Value) {
        match key {
            "gps/running" => self.gps.running = as_flag(value),
            "gps/enabled" => self.gps.enabled = as_flag(value),
            "rb/running" => self.iridium.running = as_flag(value),
            "rb/enabled" => self.iridium.enabled = as_flag(value),
            "lora/running" => self.lora.running = as_flag(value),
            "lora/enabled" => self.lora.enabled = as_flag(value),
            _ => {}
        }
        self.fields.insert(key.to_string(), value.clone());
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Devices report flags as booleans, numbers, or their string forms.
fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(text) => match text.as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
