use serde::{Deserialize, Serialize};

/// Operator roles, most to least privileged.
///
/// In practice Admin ⊇ Operator ⊇ Viewer, but the permission tables below
/// are independent explicit sets so capability checks stay total and
/// auditable. Never derive one role's set from another's.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
}

/// A single named permission, checked independently per role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    ReadStatus,
    ReadLogs,
    ControlConnection,
    ReadConfig,
    WriteConfig,
    ReadUsers,
    WriteUsers,
}

const ADMIN_CAPS: &[Capability] = &[
    Capability::ReadStatus,
    Capability::ReadLogs,
    Capability::ControlConnection,
    Capability::ReadConfig,
    Capability::WriteConfig,
    Capability::ReadUsers,
    Capability::WriteUsers,
];

const OPERATOR_CAPS: &[Capability] = &[
    Capability::ReadStatus,
    Capability::ReadLogs,
    Capability::ControlConnection,
    Capability::ReadConfig,
];

const VIEWER_CAPS: &[Capability] = &[Capability::ReadStatus, Capability::ReadLogs];

impl Role {
    /// The fixed permission set for this role.
    pub fn permissions(self) -> &'static [Capability] {
        match self {
            Self::Admin => ADMIN_CAPS,
            Self::Operator => OPERATOR_CAPS,
            Self::Viewer => VIEWER_CAPS,
        }
    }

    pub fn can(self, capability: Capability) -> bool {
        self.permissions().contains(&capability)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Operator => "operator",
            Self::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "operator" => Ok(Self::Operator),
            "viewer" => Ok(Self::Viewer),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_has_every_capability() {
        for cap in [
            Capability::ReadStatus,
            Capability::ReadLogs,
            Capability::ControlConnection,
            Capability::ReadConfig,
            Capability::WriteConfig,
            Capability::ReadUsers,
            Capability::WriteUsers,
        ] {
            assert!(Role::Admin.can(cap), "admin missing {cap:?}");
        }
    }

    #[test]
    fn operator_controls_but_cannot_manage_users() {
        assert!(Role::Operator.can(Capability::ControlConnection));
        assert!(Role::Operator.can(Capability::ReadConfig));
        assert!(!Role::Operator.can(Capability::WriteConfig));
        assert!(!Role::Operator.can(Capability::ReadUsers));
        assert!(!Role::Operator.can(Capability::WriteUsers));
    }

    #[test]
    fn viewer_is_read_only() {
        assert!(Role::Viewer.can(Capability::ReadStatus));
        assert!(Role::Viewer.can(Capability::ReadLogs));
        assert!(!Role::Viewer.can(Capability::ControlConnection));
        assert!(!Role::Viewer.can(Capability::ReadConfig));
    }

    #[test]
    fn containment_holds_in_the_data() {
        for cap in Role::Viewer.permissions() {
            assert!(Role::Operator.can(*cap));
        }
        for cap in Role::Operator.permissions() {
            assert!(Role::Admin.can(*cap));
        }
    }

    #[test]
    fn role_parse_roundtrip() {
        for role in [Role::Admin, Role::Operator, Role::Viewer] {
            let parsed: Role = role.as_str().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn capability_serializes_kebab_case() {
        let json = serde_json::to_string(&Capability::ControlConnection).unwrap();
        assert_eq!(json, "\"control-connection\"");
        let json = serde_json::to_string(&Capability::ReadStatus).unwrap();
        assert_eq!(json, "\"read-status\"");
    }
}
