//! HTTP/2 connection settings.

use crate::frame::{self, Setting, SettingId};

/// One endpoint's SETTINGS.
///
/// A connection keeps two of these: the local settings it advertises and the
/// remote settings the peer has announced so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Maximum number of concurrent streams the sender will accept.
    pub max_concurrent_streams: u32,
    /// Initial stream receive window.
    pub initial_window_size: u32,
    /// Largest frame payload the sender will accept.
    pub max_frame_size: u32,
    /// Advisory limit on decoded header list size.
    pub max_header_list_size: u32,
    /// HPACK dynamic table size.
    pub header_table_size: u32,
    /// Always false for this engine; push is never used.
    pub enable_push: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_streams: frame::DEFAULT_MAX_CONCURRENT_STREAMS,
            initial_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: 16384,
            header_table_size: frame::DEFAULT_HEADER_TABLE_SIZE,
            enable_push: false,
        }
    }
}

impl ConnectionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// RFC 9113 defaults, which apply to the peer until its first SETTINGS.
    ///
    /// Unlike [`Default`], the protocol default for concurrent streams is
    /// unlimited.
    pub fn protocol_defaults() -> Self {
        Self {
            max_concurrent_streams: u32::MAX,
            max_header_list_size: u32::MAX,
            enable_push: true,
            ..Self::default()
        }
    }

    pub fn max_concurrent_streams(mut self, value: u32) -> Self {
        self.max_concurrent_streams = value;
        self
    }

    pub fn initial_window_size(mut self, value: u32) -> Self {
        self.initial_window_size = value.min(frame::MAX_WINDOW_SIZE);
        self
    }

    pub fn max_frame_size(mut self, value: u32) -> Self {
        self.max_frame_size = value.clamp(frame::DEFAULT_MAX_FRAME_SIZE, frame::MAX_FRAME_SIZE);
        self
    }

    pub fn max_header_list_size(mut self, value: u32) -> Self {
        self.max_header_list_size = value;
        self
    }

    pub fn header_table_size(mut self, value: u32) -> Self {
        self.header_table_size = value;
        self
    }

    /// Settings to put in the initial SETTINGS frame.
    pub fn to_settings(&self) -> Vec<Setting> {
        vec![
            Setting {
                id: SettingId::EnablePush,
                value: self.enable_push as u32,
            },
            Setting {
                id: SettingId::MaxConcurrentStreams,
                value: self.max_concurrent_streams,
            },
            Setting {
                id: SettingId::InitialWindowSize,
                value: self.initial_window_size,
            },
            Setting {
                id: SettingId::MaxFrameSize,
                value: self.max_frame_size,
            },
            Setting {
                id: SettingId::MaxHeaderListSize,
                value: self.max_header_list_size,
            },
        ]
    }

    /// Apply one received setting. Unknown identifiers are ignored.
    ///
    /// Returns true if the value changed.
    pub fn apply(&mut self, setting: Setting) -> bool {
        let slot = match setting.id {
            SettingId::HeaderTableSize => &mut self.header_table_size,
            SettingId::MaxConcurrentStreams => &mut self.max_concurrent_streams,
            SettingId::InitialWindowSize => &mut self.initial_window_size,
            SettingId::MaxFrameSize => &mut self.max_frame_size,
            SettingId::MaxHeaderListSize => &mut self.max_header_list_size,
            SettingId::EnablePush => {
                let value = setting.value == 1;
                let changed = self.enable_push != value;
                self.enable_push = value;
                return changed;
            }
            SettingId::Unknown(_) => return false,
        };
        let changed = *slot != setting.value;
        *slot = setting.value;
        changed
    }
}
