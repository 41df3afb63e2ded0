//! Remote-control port messages

use super::keys::{KeyDirection, RemoteKey};
use crate::codec::Envelope;
use crate::Result;
use prost::Message;

/// Envelope field numbers for remote messages
pub mod message_type {
    pub const CONFIGURE: u32 = 1;
    pub const SET_ACTIVE: u32 = 2;
    pub const ERROR: u32 = 3;
    pub const PING_REQUEST: u32 = 8;
    pub const PING_RESPONSE: u32 = 9;
    pub const KEY_INJECT: u32 = 10;
    pub const IME_KEY_INJECT: u32 = 20;
    pub const IME_BATCH_EDIT: u32 = 21;
    pub const START: u32 = 40;
    pub const SET_VOLUME_LEVEL: u32 = 50;
    pub const APP_LINK_LAUNCH: u32 = 90;
}

#[derive(Clone, PartialEq, Message)]
pub struct RemoteDeviceInfo {
    #[prost(string, tag = "1")]
    pub model: String,
    #[prost(string, tag = "2")]
    pub vendor: String,
    #[prost(int32, tag = "3")]
    pub unknown1: i32,
    #[prost(string, tag = "4")]
    pub unknown2: String,
    #[prost(string, tag = "5")]
    pub package_name: String,
    #[prost(string, tag = "6")]
    pub app_version: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemoteConfigure {
    #[prost(int32, tag = "1")]
    pub code1: i32,
    #[prost(message, optional, tag = "2")]
    pub device_info: Option<RemoteDeviceInfo>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemoteSetActive {
    #[prost(int32, tag = "1")]
    pub active: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemoteError {
    #[prost(bool, tag = "1")]
    pub value: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemotePingRequest {
    #[prost(int32, tag = "1")]
    pub val1: i32,
    #[prost(int32, tag = "2")]
    pub val2: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemotePingResponse {
    #[prost(int32, tag = "1")]
    pub val1: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemoteKeyInject {
    #[prost(int32, tag = "1")]
    pub key_code: i32,
    #[prost(enumeration = "KeyDirection", tag = "2")]
    pub direction: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemoteAppInfo {
    #[prost(int32, tag = "1")]
    pub counter: i32,
    #[prost(string, tag = "10")]
    pub label: String,
    #[prost(string, tag = "12")]
    pub app_package: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemoteTextFieldStatus {
    #[prost(int32, tag = "1")]
    pub counter_field: i32,
    #[prost(string, tag = "2")]
    pub value: String,
    #[prost(int32, tag = "3")]
    pub start: i32,
    #[prost(int32, tag = "4")]
    pub end: i32,
    #[prost(string, tag = "6")]
    pub label: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemoteImeKeyInject {
    #[prost(message, optional, tag = "1")]
    pub app_info: Option<RemoteAppInfo>,
    #[prost(message, optional, tag = "2")]
    pub text_field_status: Option<RemoteTextFieldStatus>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemoteImeObject {
    #[prost(int32, tag = "1")]
    pub start: i32,
    #[prost(int32, tag = "2")]
    pub end: i32,
    #[prost(string, tag = "3")]
    pub value: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemoteEditInfo {
    #[prost(int32, tag = "1")]
    pub insert: i32,
    #[prost(message, optional, tag = "2")]
    pub text_field_status: Option<RemoteImeObject>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemoteImeBatchEdit {
    #[prost(int32, tag = "1")]
    pub ime_counter: i32,
    #[prost(int32, tag = "2")]
    pub field_counter: i32,
    #[prost(message, repeated, tag = "3")]
    pub edit_info: Vec<RemoteEditInfo>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemoteStart {
    #[prost(bool, tag = "1")]
    pub started: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemoteSetVolumeLevel {
    #[prost(string, tag = "3")]
    pub player_model: String,
    #[prost(uint32, tag = "6")]
    pub volume_max: u32,
    #[prost(uint32, tag = "7")]
    pub volume_level: u32,
    #[prost(bool, tag = "8")]
    pub volume_muted: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct RemoteAppLinkLaunchRequest {
    #[prost(string, tag = "1")]
    pub app_link: String,
}

/// Typed remote message
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteMessage {
    Configure(RemoteConfigure),
    SetActive(RemoteSetActive),
    Error(RemoteError),
    PingRequest(RemotePingRequest),
    PingResponse(RemotePingResponse),
    KeyInject(RemoteKeyInject),
    ImeKeyInject(RemoteImeKeyInject),
    ImeBatchEdit(RemoteImeBatchEdit),
    Start(RemoteStart),
    SetVolumeLevel(RemoteSetVolumeLevel),
    AppLinkLaunch(RemoteAppLinkLaunchRequest),
    /// A message type we do not act on (voice, audio device selection, ...)
    Unhandled(u32),
}

impl RemoteMessage {
    /// Key press
    pub fn key(key: RemoteKey, direction: KeyDirection) -> Self {
        RemoteMessage::KeyInject(RemoteKeyInject {
            key_code: key.code(),
            direction: direction as i32,
        })
    }

    /// Text insertion replaying the device's IME counters
    pub fn insert_text(text: &str, ime_counter: i32, field_counter: i32) -> Self {
        let cursor = text.chars().count() as i32 - 1;
        RemoteMessage::ImeBatchEdit(RemoteImeBatchEdit {
            ime_counter,
            field_counter,
            edit_info: vec![RemoteEditInfo {
                insert: 1,
                text_field_status: Some(RemoteImeObject {
                    start: cursor,
                    end: cursor,
                    value: text.to_string(),
                }),
            }],
        })
    }

    /// Envelope field number of this message
    pub fn message_type(&self) -> u32 {
        use message_type::*;
        match self {
            RemoteMessage::Configure(_) => CONFIGURE,
            RemoteMessage::SetActive(_) => SET_ACTIVE,
            RemoteMessage::Error(_) => ERROR,
            RemoteMessage::PingRequest(_) => PING_REQUEST,
            RemoteMessage::PingResponse(_) => PING_RESPONSE,
            RemoteMessage::KeyInject(_) => KEY_INJECT,
            RemoteMessage::ImeKeyInject(_) => IME_KEY_INJECT,
            RemoteMessage::ImeBatchEdit(_) => IME_BATCH_EDIT,
            RemoteMessage::Start(_) => START,
            RemoteMessage::SetVolumeLevel(_) => SET_VOLUME_LEVEL,
            RemoteMessage::AppLinkLaunch(_) => APP_LINK_LAUNCH,
            RemoteMessage::Unhandled(message_type) => *message_type,
        }
    }

    /// Wrap in a remote envelope
    pub fn to_envelope(&self) -> Envelope {
        let payload = match self {
            RemoteMessage::Configure(m) => m.encode_to_vec(),
            RemoteMessage::SetActive(m) => m.encode_to_vec(),
            RemoteMessage::Error(m) => m.encode_to_vec(),
            RemoteMessage::PingRequest(m) => m.encode_to_vec(),
            RemoteMessage::PingResponse(m) => m.encode_to_vec(),
            RemoteMessage::KeyInject(m) => m.encode_to_vec(),
            RemoteMessage::ImeKeyInject(m) => m.encode_to_vec(),
            RemoteMessage::ImeBatchEdit(m) => m.encode_to_vec(),
            RemoteMessage::Start(m) => m.encode_to_vec(),
            RemoteMessage::SetVolumeLevel(m) => m.encode_to_vec(),
            RemoteMessage::AppLinkLaunch(m) => m.encode_to_vec(),
            RemoteMessage::Unhandled(_) => Vec::new(),
        };
        Envelope::remote(self.message_type(), payload)
    }

    /// Decode a remote envelope
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        use message_type::*;

        let body = &envelope.payload[..];
        let message = match envelope.message_type {
            CONFIGURE => RemoteMessage::Configure(RemoteConfigure::decode(body)?),
            SET_ACTIVE => RemoteMessage::SetActive(RemoteSetActive::decode(body)?),
            ERROR => RemoteMessage::Error(RemoteError::decode(body)?),
            PING_REQUEST => RemoteMessage::PingRequest(RemotePingRequest::decode(body)?),
            PING_RESPONSE => RemoteMessage::PingResponse(RemotePingResponse::decode(body)?),
            KEY_INJECT => RemoteMessage::KeyInject(RemoteKeyInject::decode(body)?),
            IME_KEY_INJECT => RemoteMessage::ImeKeyInject(RemoteImeKeyInject::decode(body)?),
            IME_BATCH_EDIT => RemoteMessage::ImeBatchEdit(RemoteImeBatchEdit::decode(body)?),
            START => RemoteMessage::Start(RemoteStart::decode(body)?),
            SET_VOLUME_LEVEL => {
                RemoteMessage::SetVolumeLevel(RemoteSetVolumeLevel::decode(body)?)
            }
            APP_LINK_LAUNCH => {
                RemoteMessage::AppLinkLaunch(RemoteAppLinkLaunchRequest::decode(body)?)
            }
            other => RemoteMessage::Unhandled(other),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_inject_wire_bytes() {
        let envelope = RemoteMessage::key(RemoteKey::Home, KeyDirection::Short).to_envelope();
        assert_eq!(envelope.protocol_version, 0);
        // field 10, length 4, key_code 3, direction SHORT
        assert_eq!(&envelope.encode()[..], &[0x52, 0x04, 0x08, 0x03, 0x10, 0x03][..]);
    }

    #[test]
    fn test_insert_text_uses_counters() {
        let message = RemoteMessage::insert_text("abc", 4, 9);
        let decoded = RemoteMessage::from_envelope(&message.to_envelope()).unwrap();
        match decoded {
            RemoteMessage::ImeBatchEdit(edit) => {
                assert_eq!(edit.ime_counter, 4);
                assert_eq!(edit.field_counter, 9);
                let object = edit.edit_info[0].text_field_status.clone().unwrap();
                assert_eq!(object.value, "abc");
                assert_eq!(object.start, 2);
                assert_eq!(object.end, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_unhandled() {
        let envelope = Envelope::remote(30, vec![0x08, 0x01]);
        assert_eq!(
            RemoteMessage::from_envelope(&envelope).unwrap(),
            RemoteMessage::Unhandled(30)
        );
    }

    #[test]
    fn test_configure_round_trip() {
        let configure = RemoteMessage::Configure(RemoteConfigure {
            code1: 622,
            device_info: Some(RemoteDeviceInfo {
                model: "tvlink".to_string(),
                vendor: "tvlink".to_string(),
                unknown1: 1,
                unknown2: "1".to_string(),
                package_name: "tvlink".to_string(),
                app_version: "1.0.0".to_string(),
            }),
        });
        let frame = configure.to_envelope().encode();
        assert_eq!(frame[0], 0x0A, "field 1, length-delimited");
        let decoded = RemoteMessage::from_envelope(&Envelope::decode(&frame).unwrap()).unwrap();
        assert_eq!(decoded, configure);
    }
}
