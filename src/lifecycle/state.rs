//! Container and volume states

use crate::error::{HangarError, HangarResult};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Creating,
    Created,
    Destroying,
}

impl ContainerState {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Destroying => "destroying",
        }
    }

    /// Parse a stored state; anything else is rejected rather than skipped
    pub fn from_label(s: &str) -> HangarResult<Self> {
        match s {
            "creating" => Ok(Self::Creating),
            "created" => Ok(Self::Created),
            "destroying" => Ok(Self::Destroying),
            other => Err(HangarError::UnknownState {
                entity: "container",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    Creating,
    Created,
    Destroying,
}

impl VolumeState {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Destroying => "destroying",
        }
    }

    pub fn from_label(s: &str) -> HangarResult<Self> {
        match s {
            "creating" => Ok(Self::Creating),
            "created" => Ok(Self::Created),
            "destroying" => Ok(Self::Destroying),
            other => Err(HangarError::UnknownState {
                entity: "volume",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for state in [
            ContainerState::Creating,
            ContainerState::Created,
            ContainerState::Destroying,
        ] {
            assert_eq!(ContainerState::from_label(state.as_label()).unwrap(), state);
        }
        for state in [
            VolumeState::Creating,
            VolumeState::Created,
            VolumeState::Destroying,
        ] {
            assert_eq!(VolumeState::from_label(&state.to_string()).unwrap(), state);
        }
    }

    #[test]
    fn unknown_state_is_rejected() {
        let err = ContainerState::from_label("exploded").unwrap_err();
        assert_eq!(err.to_string(), "unknown container state: exploded");
        assert!(matches!(
            VolumeState::from_label(""),
            Err(HangarError::UnknownState { entity: "volume", .. })
        ));
    }
}
