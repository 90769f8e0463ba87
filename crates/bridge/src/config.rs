//! Bridge configuration, validated at construction.

use serde::Deserialize;

use crate::binary::BinaryCodec;
use crate::codec::{FrameCodec, OptionalFields};
use crate::json::JsonCodec;

/// Wire format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// JSON objects, optional fields per configuration.
    Json,
    /// Byte-exact binary records, no optional fields.
    Binary,
}

/// A `mqtt://host:port` broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct BrokerAddr {
    /// Broker hostname or address.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
}

impl BrokerAddr {
    /// Parse a `mqtt://host:port` URI.
    ///
    /// # Errors
    ///
    /// Rejects other schemes, missing ports, and unparseable ports.
    pub fn parse(uri: &str) -> Result<Self, ConfigError> {
        let bad = || ConfigError::BadBrokerUri(uri.to_owned());
        let rest = uri.strip_prefix("mqtt://").ok_or_else(bad)?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(bad)?;
        if host.is_empty() {
            return Err(bad());
        }
        let port: u16 = port.parse().map_err(|_| bad())?;
        Ok(Self {
            host: host.to_owned(),
            port,
        })
    }
}

impl TryFrom<String> for BrokerAddr {
    type Error = ConfigError;

    fn try_from(uri: String) -> Result<Self, Self::Error> {
        Self::parse(&uri)
    }
}

/// Errors that make a bridge configuration unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The broker URI is not `mqtt://host:port`.
    BadBrokerUri(String),
    /// The binary format cannot carry optional fields.
    BinaryWithOptionalFields,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::BadBrokerUri(uri) => {
                write!(f, "broker uri {uri:?} is not mqtt://host:port")
            }
            ConfigError::BinaryWithOptionalFields => {
                write!(f, "binary format cannot carry optional fields")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Everything a bridge instance needs to come up.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Broker endpoint.
    pub broker: BrokerAddr,
    /// Channel number, 0-255; appears in every topic.
    pub channel: u8,
    /// Wire format.
    pub format: WireFormat,
    /// Optional fields the JSON encoder includes.
    #[serde(default)]
    pub optional_fields: OptionalFields,
    /// Fixed publish id, for test harnesses. Random when absent.
    #[serde(default)]
    pub pub_id: Option<u32>,
}

impl BridgeConfig {
    /// Check cross-field invariants.
    ///
    /// # Errors
    ///
    /// Any optional-field bit combined with the binary format is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.format == WireFormat::Binary && !self.optional_fields.is_empty() {
            return Err(ConfigError::BinaryWithOptionalFields);
        }
        Ok(())
    }

    /// Build the configured codec.
    #[must_use]
    pub fn build_codec(&self) -> Box<dyn FrameCodec> {
        match self.format {
            WireFormat::Json => Box::new(JsonCodec::new(self.optional_fields)),
            WireFormat::Binary => Box::new(BinaryCodec::new()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // tests use unwrap for readable assertions
mod tests {
    use super::*;
    use crate::codec::OptionalField;

    #[test]
    fn broker_uri_parses() {
        let addr = BrokerAddr::parse("mqtt://broker.local:1883").unwrap();
        assert_eq!(addr.host, "broker.local");
        assert_eq!(addr.port, 1883);
    }

    #[test]
    fn broker_uri_rejects_other_shapes() {
        for uri in ["tcp://host:1883", "mqtt://host", "mqtt://:1883", "mqtt://host:banana"] {
            assert!(BrokerAddr::parse(uri).is_err(), "{uri}");
        }
    }

    #[test]
    fn binary_with_optional_fields_is_fatal() {
        let config = BridgeConfig {
            broker: BrokerAddr::parse("mqtt://localhost:1883").unwrap(),
            channel: 1,
            format: WireFormat::Binary,
            optional_fields: OptionalFields::NONE.with(OptionalField::PubCnt),
            pub_id: None,
        };
        assert_eq!(config.validate(), Err(ConfigError::BinaryWithOptionalFields));
    }

    #[test]
    fn json_with_all_fields_is_fine() {
        let config = BridgeConfig {
            broker: BrokerAddr::parse("mqtt://localhost:1883").unwrap(),
            channel: 1,
            format: WireFormat::Json,
            optional_fields: OptionalFields::ALL,
            pub_id: None,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_deserializes_from_json() {
        let config: BridgeConfig = serde_json::from_str(
            r#"{"broker":"mqtt://10.0.0.7:1883","channel":3,"format":"binary"}"#,
        )
        .unwrap();
        assert_eq!(config.channel, 3);
        assert_eq!(config.format, WireFormat::Binary);
        assert!(config.optional_fields.is_empty());
        assert!(config.validate().is_ok());
    }
}
