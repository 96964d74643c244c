//! Device and module connection strings

use crate::error::{BridgeError, BridgeResult};
use std::fmt;
use std::str::FromStr;

/// MQTT API version IoT Hub expects in the username
pub const API_VERSION: &str = "2021-04-12";

/// Parsed `HostName=...;DeviceId=...;SharedAccessKey=...` connection string
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    host_name: String,
    device_id: String,
    module_id: Option<String>,
    shared_access_key: String,
    gateway_host_name: Option<String>,
}

impl ConnectionString {
    /// IoT Hub host name
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Device identity
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Module identity, set for IoT Edge modules
    pub fn module_id(&self) -> Option<&str> {
        self.module_id.as_deref()
    }

    /// Base64 key used to sign SAS tokens
    pub fn shared_access_key(&self) -> &str {
        &self.shared_access_key
    }

    /// Edge gateway host, set when running behind IoT Edge
    pub fn gateway_host_name(&self) -> Option<&str> {
        self.gateway_host_name.as_deref()
    }

    /// Host the transport connects to: the edge gateway when present
    pub fn connect_host(&self) -> &str {
        self.gateway_host_name.as_deref().unwrap_or(&self.host_name)
    }

    /// Resource the SAS token is scoped to
    pub fn resource_uri(&self) -> String {
        match &self.module_id {
            Some(module) => format!(
                "{}/devices/{}/modules/{}",
                self.host_name, self.device_id, module
            ),
            None => format!("{}/devices/{}", self.host_name, self.device_id),
        }
    }

    /// MQTT client identifier
    pub fn client_id(&self) -> String {
        match &self.module_id {
            Some(module) => format!("{}/{}", self.device_id, module),
            None => self.device_id.clone(),
        }
    }

    /// MQTT username
    pub fn username(&self) -> String {
        format!(
            "{}/{}/?api-version={}",
            self.host_name,
            self.client_id(),
            API_VERSION
        )
    }

    /// Telemetry topic, addressed to `output` when given
    pub fn telemetry_topic(&self, output: Option<&str>) -> String {
        let mut topic = match &self.module_id {
            Some(module) => format!(
                "devices/{}/modules/{}/messages/events/",
                self.device_id, module
            ),
            None => format!("devices/{}/messages/events/", self.device_id),
        };
        if let Some(output) = output {
            topic.push_str(&urlencoding::encode("$.on"));
            topic.push('=');
            topic.push_str(&urlencoding::encode(output));
        }
        topic
    }
}

impl FromStr for ConnectionString {
    type Err = BridgeError;

    fn from_str(s: &str) -> BridgeResult<Self> {
        let mut host_name = None;
        let mut device_id = None;
        let mut module_id = None;
        let mut shared_access_key = None;
        let mut gateway_host_name = None;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // Keys end at the first '=', base64 values may contain more
            let (key, value) = part.split_once('=').ok_or_else(|| {
                BridgeError::InvalidConnectionString(format!("malformed segment '{}'", key_of(part)))
            })?;
            let value = value.trim().to_string();

            match key.trim() {
                "HostName" => host_name = Some(value),
                "DeviceId" => device_id = Some(value),
                "ModuleId" => module_id = Some(value),
                "SharedAccessKey" => shared_access_key = Some(value),
                "GatewayHostName" => gateway_host_name = Some(value),
                // SharedAccessKeyName, x509 and friends are not used here
                _ => {}
            }
        }

        let required = |value: Option<String>, name: &str| {
            value.filter(|v| !v.is_empty()).ok_or_else(|| {
                BridgeError::InvalidConnectionString(format!("missing {}", name))
            })
        };

        Ok(Self {
            host_name: required(host_name, "HostName")?,
            device_id: required(device_id, "DeviceId")?,
            shared_access_key: required(shared_access_key, "SharedAccessKey")?,
            module_id: module_id.filter(|v| !v.is_empty()),
            gateway_host_name: gateway_host_name.filter(|v| !v.is_empty()),
        })
    }
}

fn key_of(segment: &str) -> &str {
    segment.split('=').next().unwrap_or(segment)
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .field("module_id", &self.module_id)
            .field("shared_access_key", &"***")
            .field("gateway_host_name", &self.gateway_host_name)
            .finish()
    }
}
