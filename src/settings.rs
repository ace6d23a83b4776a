//! Settings negotiation state.
//!
//! HTTP/2 settings are two-phase: a value sent in a SETTINGS frame is not in
//! effect until the receiving peer acknowledges the frame. The store keeps
//! the current value per parameter alongside a queue of unacknowledged
//! values in send order; each acknowledgement promotes exactly one pending
//! value per parameter.

use crate::{
    error::Http2Error,
    types::{ErrorCode, SettingsParameter},
};
use enum_map::EnumMap;
use std::collections::VecDeque;

/// A single setting change applied by an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangedSetting {
    pub setting: SettingsParameter,
    /// The value in effect before the acknowledgement, if any was.
    pub original_value: Option<u32>,
    pub new_value: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    current: EnumMap<SettingsParameter, Option<u32>>,
    pending: EnumMap<SettingsParameter, VecDeque<u32>>,
}

impl SettingsStore {
    /// A store holding the RFC 7540 defaults. `client` picks the default
    /// for ENABLE_PUSH: permitted for clients, off for servers.
    #[must_use]
    pub fn new(client: bool) -> Self {
        let mut store = Self::default();
        store.current[SettingsParameter::HeaderTableSize] = Some(4096);
        store.current[SettingsParameter::EnablePush] = Some(u32::from(client));
        store.current[SettingsParameter::InitialWindowSize] = Some(65_535);
        store.current[SettingsParameter::MaxFrameSize] = Some(16_384);
        store
    }

    /// Overrides the current value without going through the pending queue.
    /// Used for role-specific initial values we advertise at startup.
    pub(crate) fn set_initial(&mut self, setting: SettingsParameter, value: u32) {
        self.current[setting] = Some(value);
    }

    #[must_use]
    pub fn get(&self, setting: SettingsParameter) -> Option<u32> {
        self.current[setting]
    }

    /// Validates and queues a new value. The value only takes effect once
    /// [`acknowledge`](Self::acknowledge) runs.
    pub fn set(&mut self, setting: SettingsParameter, value: u32) -> Result<(), Http2Error> {
        validate_setting(setting, value)?;
        self.pending[setting].push_back(value);
        Ok(())
    }

    /// Promotes one pending value per parameter, returning the changes.
    pub fn acknowledge(&mut self) -> Vec<ChangedSetting> {
        let mut changes = Vec::new();
        for (setting, queue) in self.pending.iter_mut() {
            if let Some(new_value) = queue.pop_front() {
                changes.push(ChangedSetting {
                    setting,
                    original_value: self.current[setting],
                    new_value,
                });
                self.current[setting] = Some(new_value);
            }
        }
        changes
    }

    /// Current values in ascending parameter-code order, for serialization.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(SettingsParameter, u32)> {
        self.current
            .iter()
            .filter_map(|(setting, value)| value.map(|value| (setting, value)))
            .collect()
    }

    #[must_use]
    pub fn header_table_size(&self) -> u32 {
        self.current[SettingsParameter::HeaderTableSize].unwrap_or(4096)
    }

    #[must_use]
    pub fn enable_push(&self) -> bool {
        self.current[SettingsParameter::EnablePush].unwrap_or(0) == 1
    }

    #[must_use]
    pub fn initial_window_size(&self) -> u32 {
        self.current[SettingsParameter::InitialWindowSize].unwrap_or(65_535)
    }

    #[must_use]
    pub fn max_frame_size(&self) -> u32 {
        self.current[SettingsParameter::MaxFrameSize].unwrap_or(16_384)
    }

    /// Unbounded unless the peer advertised a limit.
    #[must_use]
    pub fn max_concurrent_streams(&self) -> u32 {
        self.current[SettingsParameter::MaxConcurrentStreams].unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn max_header_list_size(&self) -> Option<u32> {
        self.current[SettingsParameter::MaxHeaderListSize]
    }
}

pub(crate) fn validate_setting(setting: SettingsParameter, value: u32) -> Result<(), Http2Error> {
    let invalid = match setting {
        SettingsParameter::EnablePush | SettingsParameter::EnableConnectProtocol => {
            (value > 1).then(|| ErrorCode::ProtocolError)
        }
        SettingsParameter::InitialWindowSize => {
            (value > u32::MAX >> 1).then(|| ErrorCode::FlowControlError)
        }
        SettingsParameter::MaxFrameSize => {
            (!(16_384..=16_777_215).contains(&value)).then(|| ErrorCode::ProtocolError)
        }
        _ => None,
    };
    match invalid {
        Some(code) => Err(Http2Error::InvalidSettingsValue {
            setting,
            value,
            code,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let client = SettingsStore::new(true);
        assert_eq!(client.header_table_size(), 4096);
        assert!(client.enable_push());
        assert_eq!(client.initial_window_size(), 65_535);
        assert_eq!(client.max_frame_size(), 16_384);
        assert_eq!(client.max_concurrent_streams(), u32::MAX);
        assert_eq!(client.max_header_list_size(), None);

        let server = SettingsStore::new(false);
        assert!(!server.enable_push());
    }

    #[test]
    fn pending_values_take_effect_on_acknowledge() {
        let mut store = SettingsStore::new(true);
        store
            .set(SettingsParameter::InitialWindowSize, 1280)
            .unwrap();
        assert_eq!(store.initial_window_size(), 65_535);

        let changes = store.acknowledge();
        assert_eq!(
            changes,
            vec![ChangedSetting {
                setting: SettingsParameter::InitialWindowSize,
                original_value: Some(65_535),
                new_value: 1280,
            }]
        );
        assert_eq!(store.initial_window_size(), 1280);
    }

    #[test]
    fn one_pending_value_promoted_per_acknowledge() {
        let mut store = SettingsStore::new(true);
        store.set(SettingsParameter::HeaderTableSize, 8192).unwrap();
        store.set(SettingsParameter::HeaderTableSize, 0).unwrap();

        store.acknowledge();
        assert_eq!(store.header_table_size(), 8192);
        store.acknowledge();
        assert_eq!(store.header_table_size(), 0);
        assert!(store.acknowledge().is_empty());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut store = SettingsStore::new(true);
        match store.set(SettingsParameter::EnablePush, 2) {
            Err(Http2Error::InvalidSettingsValue { code, .. }) => {
                assert_eq!(code, ErrorCode::ProtocolError);
            }
            other => panic!("unexpected: {:?}", other),
        }
        match store.set(SettingsParameter::InitialWindowSize, 1 << 31) {
            Err(Http2Error::InvalidSettingsValue { code, .. }) => {
                assert_eq!(code, ErrorCode::FlowControlError);
            }
            other => panic!("unexpected: {:?}", other),
        }
        match store.set(SettingsParameter::MaxFrameSize, 16_383) {
            Err(Http2Error::InvalidSettingsValue { code, .. }) => {
                assert_eq!(code, ErrorCode::ProtocolError);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
