//! Discovered attribute profile and handle resolution.
//!
//! A [`Profile`] is the flat list of characteristics and descriptors a
//! peripheral exposes. [`AttributeHandles::resolve`] picks the three
//! attributes the Airbox protocol needs out of it, once per session.

use std::fmt;

use uuid::Uuid;

use airbox_types::AttributeRole;
use airbox_types::uuids::{CLIENT_CHARACTERISTIC_CONFIG, COMMAND, NOTIFY};

use crate::error::{Error, Result};

/// Whether an attribute is a characteristic or a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Characteristic,
    Descriptor,
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeKind::Characteristic => write!(f, "characteristic"),
            AttributeKind::Descriptor => write!(f, "descriptor"),
        }
    }
}

/// Opaque reference to one discovered attribute.
///
/// The `id` is only meaningful to the link that produced the profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeHandle {
    id: u16,
    uuid: Uuid,
    kind: AttributeKind,
    characteristic: Option<Uuid>,
}

impl AttributeHandle {
    /// A characteristic handle.
    pub fn characteristic(id: u16, uuid: Uuid) -> Self {
        Self {
            id,
            uuid,
            kind: AttributeKind::Characteristic,
            characteristic: None,
        }
    }

    /// A descriptor handle, owned by the characteristic `characteristic`.
    pub fn descriptor(id: u16, uuid: Uuid, characteristic: Uuid) -> Self {
        Self {
            id,
            uuid,
            kind: AttributeKind::Descriptor,
            characteristic: Some(characteristic),
        }
    }

    /// Link-local handle id.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Attribute UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Characteristic or descriptor.
    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    /// The owning characteristic, for descriptors.
    pub fn parent(&self) -> Option<Uuid> {
        self.characteristic
    }
}

/// The set of attributes a peripheral exposes, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    attributes: Vec<AttributeHandle>,
}

impl Profile {
    /// A profile from already numbered handles.
    pub fn new(attributes: Vec<AttributeHandle>) -> Self {
        Self { attributes }
    }

    /// Start building a profile; handle ids are assigned in insertion order.
    pub fn builder() -> ProfileBuilder {
        ProfileBuilder::default()
    }

    /// The profile an Airbox device exposes: the command characteristic,
    /// the notify characteristic and its configuration descriptor.
    pub fn airbox() -> Self {
        Self::builder()
            .characteristic(COMMAND)
            .characteristic(NOTIFY)
            .descriptor(NOTIFY, CLIENT_CHARACTERISTIC_CONFIG)
            .build()
    }

    /// Number of attributes, descriptors included.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether discovery found nothing.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Attributes in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &AttributeHandle> {
        self.attributes.iter()
    }

    /// Find a characteristic by UUID.
    pub fn find_characteristic(&self, uuid: Uuid) -> Option<AttributeHandle> {
        self.attributes
            .iter()
            .find(|a| a.kind == AttributeKind::Characteristic && a.uuid == uuid)
            .copied()
    }

    /// Find a descriptor by UUID, preferring the one owned by `parent`.
    ///
    /// Falls back to the first descriptor with that UUID anywhere in the
    /// profile.
    pub fn find_descriptor(&self, uuid: Uuid, parent: Uuid) -> Option<AttributeHandle> {
        let mut descriptors = self
            .attributes
            .iter()
            .filter(|a| a.kind == AttributeKind::Descriptor && a.uuid == uuid);

        let first = descriptors.next().copied();
        if first.is_some_and(|d| d.characteristic == Some(parent)) {
            return first;
        }
        descriptors
            .find(|d| d.characteristic == Some(parent))
            .copied()
            .or(first)
    }
}

/// Builder for [`Profile`].
#[derive(Debug, Default)]
pub struct ProfileBuilder {
    attributes: Vec<AttributeHandle>,
}

impl ProfileBuilder {
    fn next_id(&self) -> u16 {
        u16::try_from(self.attributes.len()).unwrap_or(u16::MAX)
    }

    /// Add a characteristic.
    #[must_use]
    pub fn characteristic(mut self, uuid: Uuid) -> Self {
        let handle = AttributeHandle::characteristic(self.next_id(), uuid);
        self.attributes.push(handle);
        self
    }

    /// Add a descriptor under `characteristic`.
    #[must_use]
    pub fn descriptor(mut self, characteristic: Uuid, uuid: Uuid) -> Self {
        let handle = AttributeHandle::descriptor(self.next_id(), uuid, characteristic);
        self.attributes.push(handle);
        self
    }

    /// Finish the profile.
    pub fn build(self) -> Profile {
        Profile::new(self.attributes)
    }
}

/// The resolved attributes of an Airbox device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeHandles {
    pub command: AttributeHandle,
    pub notify: AttributeHandle,
    pub notify_config: AttributeHandle,
}

impl AttributeHandles {
    /// Resolve the command, notify and notify configuration attributes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingAttribute`] for the first attribute that is
    /// not in `profile`.
    pub fn resolve(profile: &Profile) -> Result<Self> {
        let count = profile.len();
        let command = profile
            .find_characteristic(COMMAND)
            .ok_or_else(|| Error::missing_attribute(COMMAND, AttributeKind::Characteristic, count))?;
        let notify = profile
            .find_characteristic(NOTIFY)
            .ok_or_else(|| Error::missing_attribute(NOTIFY, AttributeKind::Characteristic, count))?;
        let notify_config = profile
            .find_descriptor(CLIENT_CHARACTERISTIC_CONFIG, NOTIFY)
            .ok_or_else(|| {
                Error::missing_attribute(
                    CLIENT_CHARACTERISTIC_CONFIG,
                    AttributeKind::Descriptor,
                    count,
                )
            })?;

        Ok(Self {
            command,
            notify,
            notify_config,
        })
    }

    /// The handle a frame for `role` is written to.
    pub fn get(&self, role: AttributeRole) -> AttributeHandle {
        match role {
            AttributeRole::Command => self.command,
            AttributeRole::Notify => self.notify,
            AttributeRole::NotifyConfig => self.notify_config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airbox_types::uuid::from_short;

    #[test]
    fn test_resolve_airbox_profile() {
        let profile = Profile::airbox();
        let handles = AttributeHandles::resolve(&profile).unwrap();

        assert_eq!(handles.command.uuid(), COMMAND);
        assert_eq!(handles.notify.uuid(), NOTIFY);
        assert_eq!(handles.notify_config.uuid(), CLIENT_CHARACTERISTIC_CONFIG);
        assert_eq!(handles.notify_config.kind(), AttributeKind::Descriptor);
        assert_eq!(handles.notify_config.parent(), Some(NOTIFY));
    }

    #[test]
    fn test_get_by_role() {
        let handles = AttributeHandles::resolve(&Profile::airbox()).unwrap();
        assert_eq!(handles.get(AttributeRole::Command), handles.command);
        assert_eq!(handles.get(AttributeRole::Notify), handles.notify);
        assert_eq!(handles.get(AttributeRole::NotifyConfig), handles.notify_config);
    }

    #[test]
    fn test_missing_command() {
        let profile = Profile::builder()
            .characteristic(NOTIFY)
            .descriptor(NOTIFY, CLIENT_CHARACTERISTIC_CONFIG)
            .build();

        let err = AttributeHandles::resolve(&profile).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingAttribute {
                uuid,
                kind: AttributeKind::Characteristic,
                attribute_count: 2,
            } if uuid == COMMAND
        ));
    }

    #[test]
    fn test_missing_descriptor() {
        let profile = Profile::builder()
            .characteristic(COMMAND)
            .characteristic(NOTIFY)
            .build();

        let err = AttributeHandles::resolve(&profile).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingAttribute {
                kind: AttributeKind::Descriptor,
                ..
            }
        ));
    }

    #[test]
    fn test_descriptor_prefers_notify_owner() {
        let battery_level = from_short(0x2a19);
        let profile = Profile::builder()
            .characteristic(battery_level)
            .descriptor(battery_level, CLIENT_CHARACTERISTIC_CONFIG)
            .characteristic(COMMAND)
            .characteristic(NOTIFY)
            .descriptor(NOTIFY, CLIENT_CHARACTERISTIC_CONFIG)
            .build();

        let handles = AttributeHandles::resolve(&profile).unwrap();
        assert_eq!(handles.notify_config.parent(), Some(NOTIFY));
        assert_eq!(handles.notify_config.id(), 4);
    }

    #[test]
    fn test_descriptor_falls_back_to_first() {
        let other = from_short(0xfff2);
        let profile = Profile::builder()
            .characteristic(COMMAND)
            .characteristic(NOTIFY)
            .characteristic(other)
            .descriptor(other, CLIENT_CHARACTERISTIC_CONFIG)
            .build();

        let handles = AttributeHandles::resolve(&profile).unwrap();
        assert_eq!(handles.notify_config.parent(), Some(other));
    }

    #[test]
    fn test_builder_assigns_sequential_ids() {
        let profile = Profile::airbox();
        let ids: Vec<u16> = profile.iter().map(AttributeHandle::id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(profile.len(), 3);
        assert!(!profile.is_empty());
        assert!(Profile::default().is_empty());
    }

    #[test]
    fn test_descriptor_is_not_a_characteristic() {
        let profile = Profile::builder()
            .descriptor(NOTIFY, COMMAND)
            .build();
        assert!(profile.find_characteristic(COMMAND).is_none());
    }
}
