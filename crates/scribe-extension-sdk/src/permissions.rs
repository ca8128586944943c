//! Permission flags granted to extensions.

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Bit flags for permissions an extension may request and be granted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Permissions: u64 {
        /// Extension may contribute UI elements to the host window.
        const UI = 1 << 0;
        /// Extension may read and write files outside its install directory.
        const FILE_SYSTEM = 1 << 1;
        /// Extension may make network requests.
        const NETWORK = 1 << 2;
        /// Extension may read and write the system clipboard.
        const CLIPBOARD = 1 << 3;
        /// Extension may show desktop notifications.
        const NOTIFICATIONS = 1 << 4;
        /// Extension may persist values in the host settings store.
        const SETTINGS = 1 << 5;
        /// Extension may register callable API endpoints.
        const API_REGISTRATION = 1 << 6;
        /// Overrides every individual permission check.
        const FULL_TRUST = 1 << 7;
    }
}

impl Permissions {
    /// Parses a single permission name as it appears in a manifest. These
    /// are the lowercase manifest spellings, not the flag identifiers.
    pub fn from_permission_name(name: &str) -> Option<Self> {
        match name {
            "ui" => Some(Self::UI),
            "file_system" => Some(Self::FILE_SYSTEM),
            "network" => Some(Self::NETWORK),
            "clipboard" => Some(Self::CLIPBOARD),
            "notifications" => Some(Self::NOTIFICATIONS),
            "settings" => Some(Self::SETTINGS),
            "api_registration" => Some(Self::API_REGISTRATION),
            "full_trust" => Some(Self::FULL_TRUST),
            _ => None,
        }
    }

    /// Parses a list of manifest permission names. Unknown names are returned
    /// separately rather than silently dropped.
    pub fn from_names<'a, I>(names: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut permissions = Self::empty();
        let mut unknown = Vec::new();
        for name in names {
            match Self::from_permission_name(name) {
                Some(flag) => permissions |= flag,
                None => unknown.push(name.to_string()),
            }
        }
        (permissions, unknown)
    }

    /// Whether this grant satisfies `required`. `FULL_TRUST` satisfies
    /// every check.
    pub fn allows(self, required: Self) -> bool {
        self.contains(Self::FULL_TRUST) || self.contains(required)
    }

    /// Names of the set flags, in bit order.
    pub fn names(self) -> Vec<&'static str> {
        const TABLE: &[(Permissions, &str)] = &[
            (Permissions::UI, "ui"),
            (Permissions::FILE_SYSTEM, "file_system"),
            (Permissions::NETWORK, "network"),
            (Permissions::CLIPBOARD, "clipboard"),
            (Permissions::NOTIFICATIONS, "notifications"),
            (Permissions::SETTINGS, "settings"),
            (Permissions::API_REGISTRATION, "api_registration"),
            (Permissions::FULL_TRUST, "full_trust"),
        ];
        TABLE
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl Serialize for Permissions {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bits = u64::deserialize(deserializer)?;
        Ok(Permissions::from_bits_retain(bits))
    }
}

impl std::fmt::Display for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.names().join("|"))
    }
}
