//! Configuration for the eletech Modbus bridge.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use eletech_bridge_framework::{BridgeConfig, BridgeError, Format, LoggingConfig, ZenohConfig};
use eletech_common::KEY_PREFIX;

use crate::registers::DeviceProfile;
use crate::scheduler::PollSettings;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Payload encoding of published state
    #[serde(default)]
    pub serialization: Format,

    /// Endpoints and things
    pub modbus: ModbusConfig,
}

/// Endpoints and the things polled through them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Key expression prefix (default: "eletech")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Modbus endpoints (bridges)
    pub endpoints: Vec<EndpointConfig>,

    /// Things to poll
    pub things: Vec<ThingConfig>,
}

fn default_key_prefix() -> String {
    KEY_PREFIX.to_string()
}

/// A Modbus endpoint things share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Endpoint name, referenced by things
    pub name: String,

    /// Label used in status descriptions (default: the name)
    #[serde(default)]
    pub label: Option<String>,

    /// Connection type and address
    pub connection: ConnectionConfig,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

impl EndpointConfig {
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Connection configuration (TCP or RTU).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Modbus TCP connection
    Tcp {
        /// Host address (IP or hostname)
        host: String,
        /// TCP port (default: 502)
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// Modbus RTU (serial) connection
    Rtu {
        /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
        port: String,
        /// Baud rate (default: 9600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Data bits (default: 8)
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// Parity: "none", "even", or "odd" (default: "none")
        #[serde(default = "default_parity")]
        parity: String,
        /// Stop bits: 1 or 2 (default: 1)
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
}

fn default_modbus_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionConfig::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            ConnectionConfig::Rtu {
                port, baud_rate, ..
            } => write!(f, "rtu://{}@{}", port, baud_rate),
        }
    }
}

/// A polled Modbus slave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThingConfig {
    /// Thing name (used in key expressions)
    pub name: String,

    /// Device profile (default: "sample")
    #[serde(default = "default_thing_type")]
    pub thing_type: String,

    /// Name of the endpoint to poll through
    pub bridge: String,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_slave_address")]
    pub slave_address: u8,

    /// Poll interval in seconds
    #[serde(default = "default_refresh")]
    pub refresh: u64,

    /// Attempts per poll before it counts as failed
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
}

fn default_thing_type() -> String {
    DeviceProfile::Sample.thing_type().to_string()
}

fn default_slave_address() -> u8 {
    1
}

fn default_refresh() -> u64 {
    5
}

fn default_max_tries() -> u32 {
    3
}

impl ThingConfig {
    pub fn profile(&self) -> Option<DeviceProfile> {
        DeviceProfile::from_thing_type(&self.thing_type)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            slave_address: self.slave_address,
            interval: Duration::from_secs(self.refresh),
            max_tries: self.max_tries,
        }
    }
}

impl BridgeConfig for ModbusBridgeConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn key_prefix(&self) -> &str {
        &self.modbus.key_prefix
    }

    fn format(&self) -> Format {
        self.serialization
    }

    fn validate(&self) -> eletech_bridge_framework::Result<()> {
        let modbus = &self.modbus;

        if modbus.key_prefix.trim_end_matches('/').is_empty() {
            return Err(BridgeError::validation("key_prefix cannot be empty"));
        }
        if modbus.endpoints.is_empty() {
            return Err(BridgeError::validation(
                "At least one endpoint must be configured",
            ));
        }
        if modbus.things.is_empty() {
            return Err(BridgeError::validation(
                "At least one thing must be configured",
            ));
        }

        let mut endpoint_names = HashSet::new();
        for endpoint in &modbus.endpoints {
            if endpoint.name.is_empty() {
                return Err(BridgeError::validation("Endpoint name cannot be empty"));
            }
            if !endpoint_names.insert(endpoint.name.as_str()) {
                return Err(BridgeError::validation(format!(
                    "Duplicate endpoint name '{}'",
                    endpoint.name
                )));
            }

            if let ConnectionConfig::Rtu { parity, .. } = &endpoint.connection {
                match parity.to_lowercase().as_str() {
                    "none" | "even" | "odd" => {}
                    _ => {
                        return Err(BridgeError::validation(format!(
                            "Endpoint '{}': invalid parity '{}' (use none, even, or odd)",
                            endpoint.name, parity
                        )));
                    }
                }
            }
        }

        let mut thing_names = HashSet::new();
        for thing in &modbus.things {
            if thing.name.is_empty() {
                return Err(BridgeError::validation("Thing name cannot be empty"));
            }
            if thing.name.contains(['/', '*', '$', '#', '?', '@']) {
                return Err(BridgeError::validation(format!(
                    "Thing '{}': name cannot be used in a key expression",
                    thing.name
                )));
            }
            if !thing_names.insert(thing.name.as_str()) {
                return Err(BridgeError::validation(format!(
                    "Duplicate thing name '{}'",
                    thing.name
                )));
            }
            if !endpoint_names.contains(thing.bridge.as_str()) {
                return Err(BridgeError::validation(format!(
                    "Thing '{}': unknown endpoint '{}'",
                    thing.name, thing.bridge
                )));
            }
            if thing.profile().is_none() {
                return Err(BridgeError::validation(format!(
                    "Thing '{}': unknown thing_type '{}'",
                    thing.name, thing.thing_type
                )));
            }
            if !(1..=247).contains(&thing.slave_address) {
                return Err(BridgeError::validation(format!(
                    "Thing '{}': slave_address must be 1-247",
                    thing.name
                )));
            }
            if thing.refresh == 0 {
                return Err(BridgeError::validation(format!(
                    "Thing '{}': refresh must be at least 1 second",
                    thing.name
                )));
            }
            if thing.max_tries == 0 {
                return Err(BridgeError::validation(format!(
                    "Thing '{}': max_tries must be at least 1",
                    thing.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP_CONFIG: &str = r#"{
        zenoh: { mode: "peer" },
        modbus: {
            endpoints: [
                { name: "plant", connection: { type: "tcp", host: "192.168.1.10" } }
            ],
            things: [
                { name: "boiler", bridge: "plant" }
            ]
        }
    }"#;

    fn with_thing(thing: &str) -> String {
        format!(
            r#"{{
                modbus: {{
                    endpoints: [ {{ name: "plant", connection: {{ type: "tcp", host: "localhost" }} }} ],
                    things: [ {thing} ]
                }}
            }}"#
        )
    }

    #[test]
    fn test_parse_defaults() {
        let config = ModbusBridgeConfig::from_json5(TCP_CONFIG).unwrap();

        assert_eq!(config.key_prefix(), "eletech");
        assert_eq!(config.format(), Format::Json);

        let endpoint = &config.modbus.endpoints[0];
        assert_eq!(endpoint.label(), "plant");
        assert_eq!(endpoint.connect_timeout(), Duration::from_millis(1000));
        assert_eq!(
            endpoint.connection,
            ConnectionConfig::Tcp {
                host: "192.168.1.10".to_string(),
                port: 502
            }
        );

        let thing = &config.modbus.things[0];
        assert_eq!(thing.profile(), Some(DeviceProfile::Sample));
        assert_eq!(
            thing.poll_settings(),
            PollSettings {
                slave_address: 1,
                interval: Duration::from_secs(5),
                max_tries: 3,
            }
        );
    }

    #[test]
    fn test_parse_rtu_config() {
        let json = r#"{
            serialization: "cbor",
            modbus: {
                key_prefix: "site/eletech",
                endpoints: [
                    {
                        name: "bus0",
                        label: "RS-485 bus",
                        connection: {
                            type: "rtu",
                            port: "/dev/ttyUSB0",
                            baud_rate: 19200,
                            parity: "even"
                        }
                    }
                ],
                things: [
                    { name: "meter", bridge: "bus0", slave_address: 5, refresh: 2, max_tries: 1 }
                ]
            }
        }"#;

        let config = ModbusBridgeConfig::from_json5(json).unwrap();
        assert_eq!(config.key_prefix(), "site/eletech");
        assert_eq!(config.format(), Format::Cbor);

        let endpoint = &config.modbus.endpoints[0];
        assert_eq!(endpoint.label(), "RS-485 bus");
        assert_eq!(endpoint.connection.to_string(), "rtu:///dev/ttyUSB0@19200");
        if let ConnectionConfig::Rtu {
            data_bits,
            stop_bits,
            parity,
            ..
        } = &endpoint.connection
        {
            assert_eq!(*data_bits, 8);
            assert_eq!(*stop_bits, 1);
            assert_eq!(parity, "even");
        } else {
            panic!("Expected RTU connection");
        }

        let settings = config.modbus.things[0].poll_settings();
        assert_eq!(settings.slave_address, 5);
        assert_eq!(settings.interval, Duration::from_secs(2));
        assert_eq!(settings.max_tries, 1);
    }

    #[test]
    fn test_validate_empty_lists() {
        let no_things = r#"{ modbus: {
            endpoints: [ { name: "plant", connection: { type: "tcp", host: "localhost" } } ],
            things: []
        } }"#;
        assert!(matches!(
            ModbusBridgeConfig::from_json5(no_things),
            Err(BridgeError::ConfigValidation(_))
        ));

        let no_endpoints = r#"{ modbus: { endpoints: [], things: [] } }"#;
        assert!(matches!(
            ModbusBridgeConfig::from_json5(no_endpoints),
            Err(BridgeError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_validate_thing_fields() {
        let invalid = [
            r#"{ name: "boiler", bridge: "nowhere" }"#,
            r#"{ name: "boiler", bridge: "plant", thing_type: "boiler" }"#,
            r#"{ name: "boiler", bridge: "plant", slave_address: 0 }"#,
            r#"{ name: "boiler", bridge: "plant", slave_address: 248 }"#,
            r#"{ name: "boiler", bridge: "plant", refresh: 0 }"#,
            r#"{ name: "boiler", bridge: "plant", max_tries: 0 }"#,
            r#"{ name: "", bridge: "plant" }"#,
            r#"{ name: "boiler/1", bridge: "plant" }"#,
            r#"{ name: "boiler", bridge: "plant" }, { name: "boiler", bridge: "plant" }"#,
        ];

        for thing in invalid {
            let result = ModbusBridgeConfig::from_json5(&with_thing(thing));
            assert!(
                matches!(result, Err(BridgeError::ConfigValidation(_))),
                "accepted {thing}"
            );
        }

        let valid = with_thing(r#"{ name: "boiler", bridge: "plant" }"#);
        assert!(ModbusBridgeConfig::from_json5(&valid).is_ok());
    }

    #[test]
    fn test_validate_invalid_parity() {
        let json = r#"{ modbus: {
            endpoints: [ { name: "bus0", connection: { type: "rtu", port: "/dev/ttyS0", parity: "mark" } } ],
            things: [ { name: "meter", bridge: "bus0" } ]
        } }"#;

        let err = ModbusBridgeConfig::from_json5(json).unwrap_err();
        assert!(err.to_string().contains("invalid parity"));
    }

    #[test]
    fn test_duplicate_endpoint() {
        let json = r#"{ modbus: {
            endpoints: [
                { name: "plant", connection: { type: "tcp", host: "a" } },
                { name: "plant", connection: { type: "tcp", host: "b" } }
            ],
            things: [ { name: "boiler", bridge: "plant" } ]
        } }"#;

        assert!(matches!(
            ModbusBridgeConfig::from_json5(json),
            Err(BridgeError::ConfigValidation(_))
        ));
    }
}
