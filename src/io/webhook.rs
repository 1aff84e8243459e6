//! TTN uplink message model
//!
//! Only the fields the pipeline needs are modelled; everything else in the
//! network server's message is ignored. The same shape arrives over the HTTP
//! webhook and on the MQTT `.../up` topics.
//!
//! `decoded_payload` must be an object or null. Any other JSON type fails the
//! parse, so the message is rejected instead of falling through to
//! `frm_payload`.

use crate::domain::types::{DeviceId, Payload, UplinkObservation};
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndDeviceIds {
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UplinkMessage {
    #[serde(default)]
    pub decoded_payload: Option<Map<String, Value>>,
    #[serde(default)]
    pub frm_payload: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TtnUplink {
    #[serde(default)]
    pub end_device_ids: EndDeviceIds,
    #[serde(default)]
    pub uplink_message: UplinkMessage,
}

impl TtnUplink {
    /// Parse a message body
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn device_id(&self) -> DeviceId {
        match self.end_device_ids.device_id.as_deref() {
            Some(id) if !id.is_empty() => DeviceId(id.to_string()),
            _ => DeviceId::unknown(),
        }
    }

    /// Select the payload variant: a non-empty decoded object first, then a
    /// non-empty FRMPayload, otherwise none.
    pub fn payload(&self) -> Option<Payload> {
        if let Some(fields) = self.structured_fields() {
            return Some(Payload::Structured(fields.clone()));
        }
        match self.uplink_message.frm_payload.as_deref() {
            Some(raw) if !raw.is_empty() => Some(Payload::Raw(raw.to_string())),
            _ => None,
        }
    }

    fn structured_fields(&self) -> Option<&Map<String, Value>> {
        self.uplink_message.decoded_payload.as_ref().filter(|fields| !fields.is_empty())
    }

    /// Convert into a pipeline input stamped with the current time
    pub fn into_observation(self) -> UplinkObservation {
        UplinkObservation::new(self.device_id(), self.payload())
    }
}
