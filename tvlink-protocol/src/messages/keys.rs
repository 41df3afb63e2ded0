//! Remote key vocabulary
//!
//! Android key codes for the buttons of a physical remote. Names follow the
//! Android `KEYCODE_` constants without the prefix.

use crate::{ProtocolError, Result};
use std::fmt;
use std::str::FromStr;

/// Press semantics for an injected key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum KeyDirection {
    Unknown = 0,
    StartLong = 1,
    EndLong = 2,
    Short = 3,
}

macro_rules! remote_keys {
    ($($variant:ident = $code:expr, $name:expr;)+) => {
        /// A key on the remote
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum RemoteKey {
            $($variant,)+
        }

        impl RemoteKey {
            /// Every supported key
            pub const ALL: &'static [RemoteKey] = &[$(RemoteKey::$variant,)+];

            /// Android key code sent on the wire
            pub fn code(self) -> i32 {
                match self {
                    $(RemoteKey::$variant => $code,)+
                }
            }

            /// Canonical name (`"DPAD_UP"`, `"HOME"`, ...)
            pub fn as_str(self) -> &'static str {
                match self {
                    $(RemoteKey::$variant => $name,)+
                }
            }
        }
    };
}

remote_keys! {
    Num0 = 7, "0";
    Num1 = 8, "1";
    Num2 = 9, "2";
    Num3 = 10, "3";
    Num4 = 11, "4";
    Num5 = 12, "5";
    Num6 = 13, "6";
    Num7 = 14, "7";
    Num8 = 15, "8";
    Num9 = 16, "9";
    Home = 3, "HOME";
    Back = 4, "BACK";
    DpadUp = 19, "DPAD_UP";
    DpadDown = 20, "DPAD_DOWN";
    DpadLeft = 21, "DPAD_LEFT";
    DpadRight = 22, "DPAD_RIGHT";
    DpadCenter = 23, "DPAD_CENTER";
    VolumeUp = 24, "VOLUME_UP";
    VolumeDown = 25, "VOLUME_DOWN";
    Power = 26, "POWER";
    Enter = 66, "ENTER";
    Del = 67, "DEL";
    Menu = 82, "MENU";
    Search = 84, "SEARCH";
    MediaPlayPause = 85, "MEDIA_PLAY_PAUSE";
    MediaStop = 86, "MEDIA_STOP";
    MediaNext = 87, "MEDIA_NEXT";
    MediaPrevious = 88, "MEDIA_PREVIOUS";
    MediaRewind = 89, "MEDIA_REWIND";
    MediaFastForward = 90, "MEDIA_FAST_FORWARD";
    MediaPlay = 126, "MEDIA_PLAY";
    MediaPause = 127, "MEDIA_PAUSE";
    VolumeMute = 164, "VOLUME_MUTE";
    Info = 165, "INFO";
    ChannelUp = 166, "CHANNEL_UP";
    ChannelDown = 167, "CHANNEL_DOWN";
    Guide = 172, "GUIDE";
    Settings = 176, "SETTINGS";
    TvInput = 178, "TV_INPUT";
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoteKey {
    type Err = ProtocolError;

    /// Accepts the canonical name, case-insensitively, with or without the
    /// `KEYCODE_` prefix.
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_uppercase();
        let name = name.strip_prefix("KEYCODE_").unwrap_or(&name);

        RemoteKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == name)
            .ok_or_else(|| ProtocolError::InvalidMessage(format!("Unsupported key: {}", s)))
    }
}
