//! Broker control vocabulary and discovery payloads.
//!
//! The protocol directory talks to the broker with requests addressed
//! `{type: "broker", request: <name>}`. Replies arrive on
//! `{type: "broker", response: <name>_response}`.
//!
//! | Request | Contents | Response contents |
//! |---------|----------|-------------------|
//! | `get_protocols` | `{}` | `{<protocol>: {params, defaults}}` |
//! | `get_open_protocols` | `{}` | `{protocols: [{name, protocol_type}]}` |
//! | `open_protocol` | `{protocol_name, params}` | `{STATUS, ...}` |
//! | `close_protocol` | `{protocol}` | `{STATUS, ...}` |
//! | `get_discovery` | `{force}` | `{discovery: [DiscoveryPayload]}` |
//!
//! `get_discovery_response` is also broadcast unsolicited whenever the
//! broker finishes a discovery pass.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};

use super::frame::Contents;
use super::topic::Topics;

// ============================================================================
// Constants
// ============================================================================

/// Value of the `type` topic on every broker control message.
pub const BROKER_TYPE: &str = "broker";

// ============================================================================
// BrokerRequest
// ============================================================================

/// Requests the directory can make of the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerRequest {
    /// List protocols the broker can open.
    GetProtocols,
    /// List protocols currently open.
    GetOpenProtocols,
    /// Open a protocol.
    OpenProtocol,
    /// Close a protocol.
    CloseProtocol,
    /// Run or report discovery.
    GetDiscovery,
}

impl BrokerRequest {
    /// Request name on the wire.
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GetProtocols => "get_protocols",
            Self::GetOpenProtocols => "get_open_protocols",
            Self::OpenProtocol => "open_protocol",
            Self::CloseProtocol => "close_protocol",
            Self::GetDiscovery => "get_discovery",
        }
    }

    /// Response name on the wire.
    #[inline]
    #[must_use]
    pub const fn response_name(self) -> &'static str {
        match self {
            Self::GetProtocols => "get_protocols_response",
            Self::GetOpenProtocols => "get_open_protocols_response",
            Self::OpenProtocol => "open_protocol_response",
            Self::CloseProtocol => "close_protocol_response",
            Self::GetDiscovery => "get_discovery_response",
        }
    }

    /// Topics the request is sent on.
    #[must_use]
    pub fn topics(self) -> Topics {
        Topics::new()
            .with("type", BROKER_TYPE)
            .with("request", self.name())
    }

    /// Topics the response arrives on.
    #[must_use]
    pub fn response_topics(self) -> Topics {
        Topics::new()
            .with("type", BROKER_TYPE)
            .with("response", self.response_name())
    }
}

// ============================================================================
// ProtocolDescriptor
// ============================================================================

/// An open protocol as reported by `get_open_protocols_response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolDescriptor {
    /// Protocol name, unique among open protocols.
    pub name: String,

    /// Declared protocol kind, used to pick a session constructor.
    #[serde(default)]
    pub protocol_type: Option<String>,

    /// Any other keys the broker sent.
    #[serde(flatten)]
    pub extra: Contents,
}

impl ProtocolDescriptor {
    /// Creates a descriptor with no extra keys.
    #[must_use]
    pub fn new(name: impl Into<String>, protocol_type: Option<&str>) -> Self {
        Self {
            name: name.into(),
            protocol_type: protocol_type.map(str::to_string),
            extra: Contents::new(),
        }
    }
}

/// Parses the `protocols` list of a `get_open_protocols_response`.
///
/// Entries that do not describe a protocol are skipped with a warning.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if `protocols` is missing or not a list.
pub fn parse_open_protocols(contents: &Contents) -> Result<Vec<ProtocolDescriptor>> {
    let Some(Value::Array(entries)) = contents.get("protocols") else {
        return Err(Error::protocol(
            "get_open_protocols_response without a protocols list",
        ));
    };

    Ok(entries
        .iter()
        .filter_map(
            |entry| match serde_json::from_value::<ProtocolDescriptor>(entry.clone()) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed open protocol entry");
                    None
                }
            },
        )
        .collect())
}

// ============================================================================
// AvailableProtocol
// ============================================================================

/// A configurable parameter of an available protocol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtocolParameter {
    /// Value chosen by the operator (unset until configured).
    pub value: Option<Value>,
    /// Broker-suggested defaults.
    pub defaults: Option<Value>,
}

/// A protocol the broker is able to open.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailableProtocol {
    /// Protocol name.
    pub name: String,
    /// Declared parameters by name.
    pub parameters: BTreeMap<String, ProtocolParameter>,
}

impl AvailableProtocol {
    /// Sets a parameter's value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the protocol declares no such
    /// parameter.
    pub fn set(&mut self, parameter: &str, value: impl Into<Value>) -> Result<()> {
        let slot = self.parameters.get_mut(parameter).ok_or_else(|| {
            Error::invalid_argument(format!(
                "protocol {} has no parameter {parameter}",
                self.name
            ))
        })?;
        slot.value = Some(value.into());
        Ok(())
    }

    /// Builds an open request from the configured parameter values.
    ///
    /// Unset parameters are sent as `null`.
    #[must_use]
    pub fn open_request(&self) -> OpenProtocolRequest {
        let mut request = OpenProtocolRequest::new(&self.name);
        for (name, parameter) in &self.parameters {
            request = request.param(name, parameter.value.clone().unwrap_or(Value::Null));
        }
        request
    }
}

/// Parses a `get_protocols_response`.
///
/// Keys whose value is not a protocol description (such as a status field)
/// are ignored.
#[must_use]
pub fn parse_available_protocols(contents: &Contents) -> Vec<AvailableProtocol> {
    contents
        .iter()
        .filter_map(|(name, description)| {
            let description = description.as_object()?;
            let defaults = description.get("defaults").and_then(Value::as_object);

            let parameters = description
                .get("params")
                .and_then(Value::as_array)
                .map(|params| {
                    params
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|param| {
                            let parameter = ProtocolParameter {
                                value: None,
                                defaults: defaults.and_then(|d| d.get(param)).cloned(),
                            };
                            (param.to_string(), parameter)
                        })
                        .collect()
                })
                .unwrap_or_default();

            Some(AvailableProtocol {
                name: name.clone(),
                parameters,
            })
        })
        .collect()
}

// ============================================================================
// OpenProtocolRequest
// ============================================================================

/// Request to open a protocol with the given parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenProtocolRequest {
    /// Protocol name.
    pub name: String,
    /// Parameter values by name.
    pub params: Contents,
}

impl OpenProtocolRequest {
    /// Creates a request with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Contents::new(),
        }
    }

    /// Sets a parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Renders the request body.
    #[must_use]
    pub fn to_contents(&self) -> Contents {
        let mut contents = Contents::new();
        contents.insert("protocol_name".into(), Value::String(self.name.clone()));
        contents.insert("params".into(), Value::Object(self.params.clone()));
        contents
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// One child endpoint listed by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Endpoint name.
    #[serde(rename = "NAME")]
    pub name: String,

    /// Interfaces the endpoint implements. `null` reads as none.
    #[serde(rename = "INTERFACES", default, deserialize_with = "null_as_empty")]
    pub interfaces: Vec<String>,

    /// Remaining discovery keys.
    #[serde(flatten)]
    pub fields: Contents,
}

impl EndpointDescriptor {
    /// Creates a descriptor with no interfaces.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interfaces: Vec::new(),
            fields: Contents::new(),
        }
    }
}

/// Discovery data for one protocol.
///
/// `name` selects the open session it augments; `fields` holds every other
/// key except `CHILDREN`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryPayload {
    /// Protocol name.
    #[serde(rename = "NAME")]
    pub name: String,

    /// Child endpoints. Malformed children are skipped on parse.
    #[serde(rename = "CHILDREN", default, deserialize_with = "lenient_children")]
    pub children: Vec<EndpointDescriptor>,

    /// Remaining discovery keys.
    #[serde(flatten)]
    pub fields: Contents,
}

impl DiscoveryPayload {
    /// Creates an empty payload for `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
            fields: Contents::new(),
        }
    }

    /// Parses a payload from a discovery list entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the entry has no `NAME` or `CHILDREN` is
    /// not a list.
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Parses the `discovery` list of a discovery response or broadcast.
///
/// Entries that fail to parse are skipped with a warning.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if `discovery` is missing or not a list.
pub fn parse_discovery(contents: &Contents) -> Result<Vec<DiscoveryPayload>> {
    let Some(Value::Array(entries)) = contents.get("discovery") else {
        return Err(Error::protocol("discovery message without a discovery list"));
    };

    Ok(entries
        .iter()
        .filter_map(|entry| match DiscoveryPayload::from_value(entry.clone()) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(error = %e, "Skipping malformed discovery entry");
                None
            }
        })
        .collect())
}

// ============================================================================
// Lenient Fields
// ============================================================================

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parses children one by one, dropping those that do not parse.
fn lenient_children<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<EndpointDescriptor>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let entries = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(child) => Some(child),
            Err(e) => {
                warn!(error = %e, "Skipping malformed discovery child");
                None
            }
        })
        .collect())
}

// ============================================================================
// Tests
// ============================================================================
