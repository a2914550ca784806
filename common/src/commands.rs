//! Remote commands, parsed from MQTT topics or HTTP bodies into one model
//! that the control loop applies at the start of a tick.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::CommandError,
    topics::{
        TOPIC_CMD_EQUIPMENT, TOPIC_CMD_FILL, TOPIC_CMD_FOG, TOPIC_CMD_HYDRO, TOPIC_CMD_SETTINGS,
        TOPIC_CMD_WINDOW, TOPIC_SET_SETTINGS,
    },
    types::{FogMode, WindowDirection},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Equipment {
    Heat,
    Fan,
    SolutionHeat,
    Pump,
    Fill,
    PumpOverride,
}

impl Equipment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heat => "heat",
            Self::Fan => "fan",
            Self::SolutionHeat => "solution_heat",
            Self::Pump => "pump",
            Self::Fill => "fill",
            Self::PumpOverride => "pump_override",
        }
    }

    /// Devices with a hysteresis or timer loop that can be handed back.
    pub fn has_auto(self) -> bool {
        matches!(self, Self::Heat | Self::Fan | Self::SolutionHeat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentState {
    On,
    Off,
    Auto,
}

/// `{"device": "heat", "state": "on"}`
#[derive(Debug, Clone, Deserialize)]
pub struct EquipmentRequest {
    pub device: Equipment,
    pub state: EquipmentState,
}

/// `{"mode": "forced", "on": true}`; `on` only matters in forced mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FogRequest {
    pub mode: FogMode,
    #[serde(default)]
    pub on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowAction {
    Up,
    Down,
    Stop,
    Auto,
}

/// `{"action": "up", "durationMs": 20000}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowRequest {
    pub action: WindowAction,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCommand {
    Move {
        direction: WindowDirection,
        duration_ms: Option<u64>,
    },
    Stop,
    Auto,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCommand {
    SetEquipment { equipment: Equipment, on: bool },
    EquipmentAuto(Equipment),
    SetFogMode { mode: FogMode, force_on: bool },
    Window(WindowCommand),
    ToggleHydroMix,
    UpdateSettings(Map<String, Value>),
}

impl TryFrom<EquipmentRequest> for RemoteCommand {
    type Error = CommandError;

    fn try_from(request: EquipmentRequest) -> Result<Self, Self::Error> {
        let equipment = request.device;
        match request.state {
            EquipmentState::On => Ok(Self::SetEquipment { equipment, on: true }),
            EquipmentState::Off => Ok(Self::SetEquipment {
                equipment,
                on: false,
            }),
            EquipmentState::Auto if equipment.has_auto() => Ok(Self::EquipmentAuto(equipment)),
            EquipmentState::Auto => Err(CommandError::Malformed(format!(
                "{} has no automatic mode",
                equipment.as_str()
            ))),
        }
    }
}

impl From<FogRequest> for RemoteCommand {
    fn from(request: FogRequest) -> Self {
        Self::SetFogMode {
            mode: request.mode,
            force_on: request.mode == FogMode::Forced && request.on,
        }
    }
}

impl From<WindowRequest> for RemoteCommand {
    fn from(request: WindowRequest) -> Self {
        let command = match request.action {
            WindowAction::Up => WindowCommand::Move {
                direction: WindowDirection::Up,
                duration_ms: request.duration_ms,
            },
            WindowAction::Down => WindowCommand::Move {
                direction: WindowDirection::Down,
                duration_ms: request.duration_ms,
            },
            WindowAction::Stop => WindowCommand::Stop,
            WindowAction::Auto => WindowCommand::Auto,
        };
        Self::Window(command)
    }
}

fn parse_switch(payload: &str) -> Option<bool> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Some(true),
        "off" | "0" | "false" => Some(false),
        _ => None,
    }
}

impl RemoteCommand {
    pub fn from_mqtt(topic: &str, payload: &str) -> Result<Self, CommandError> {
        match topic {
            TOPIC_SET_SETTINGS | TOPIC_CMD_SETTINGS => match serde_json::from_str(payload)? {
                Value::Object(fields) => Ok(Self::UpdateSettings(fields)),
                _ => Err(CommandError::Malformed(
                    "settings update must be a JSON object".to_string(),
                )),
            },
            TOPIC_CMD_EQUIPMENT => serde_json::from_str::<EquipmentRequest>(payload)?.try_into(),
            TOPIC_CMD_FOG => Ok(serde_json::from_str::<FogRequest>(payload)?.into()),
            TOPIC_CMD_WINDOW => Ok(serde_json::from_str::<WindowRequest>(payload)?.into()),
            TOPIC_CMD_HYDRO => Ok(Self::ToggleHydroMix),
            TOPIC_CMD_FILL => {
                let on = parse_switch(payload)
                    .ok_or_else(|| CommandError::Malformed(format!("fill expects on/off, got `{payload}`")))?;
                Ok(Self::SetEquipment {
                    equipment: Equipment::Fill,
                    on,
                })
            }
            other => Err(CommandError::UnknownTopic(other.to_string())),
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SetEquipment { .. } => "equipment",
            Self::EquipmentAuto(_) => "equipment_auto",
            Self::SetFogMode { .. } => "fog_mode",
            Self::Window(_) => "window",
            Self::ToggleHydroMix => "hydro_toggle",
            Self::UpdateSettings(_) => "settings_update",
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn equipment_payloads() {
        let cmd = RemoteCommand::from_mqtt(TOPIC_CMD_EQUIPMENT, r#"{"device":"heat","state":"on"}"#)
            .unwrap();
        assert_eq!(
            cmd,
            RemoteCommand::SetEquipment {
                equipment: Equipment::Heat,
                on: true
            }
        );

        let cmd = RemoteCommand::from_mqtt(
            TOPIC_CMD_EQUIPMENT,
            r#"{"device":"solution_heat","state":"auto"}"#,
        )
        .unwrap();
        assert_eq!(cmd, RemoteCommand::EquipmentAuto(Equipment::SolutionHeat));

        let err =
            RemoteCommand::from_mqtt(TOPIC_CMD_EQUIPMENT, r#"{"device":"pump","state":"auto"}"#)
                .unwrap_err();
        assert!(matches!(err, CommandError::Malformed(_)));

        let err = RemoteCommand::from_mqtt(TOPIC_CMD_EQUIPMENT, r#"{"device":"lamp","state":"on"}"#)
            .unwrap_err();
        assert!(matches!(err, CommandError::Json(_)));
    }

    #[test]
    fn fog_on_flag_only_counts_when_forced() {
        let cmd = RemoteCommand::from_mqtt(TOPIC_CMD_FOG, r#"{"mode":"scheduled","on":true}"#).unwrap();
        assert_eq!(
            cmd,
            RemoteCommand::SetFogMode {
                mode: FogMode::Scheduled,
                force_on: false
            }
        );
        let cmd = RemoteCommand::from_mqtt(TOPIC_CMD_FOG, r#"{"mode":"forced","on":true}"#).unwrap();
        assert_eq!(
            cmd,
            RemoteCommand::SetFogMode {
                mode: FogMode::Forced,
                force_on: true
            }
        );
    }

    #[test]
    fn window_and_simple_topics() {
        let cmd = RemoteCommand::from_mqtt(TOPIC_CMD_WINDOW, r#"{"action":"down"}"#).unwrap();
        assert_eq!(
            cmd,
            RemoteCommand::Window(WindowCommand::Move {
                direction: WindowDirection::Down,
                duration_ms: None
            })
        );
        assert_eq!(
            RemoteCommand::from_mqtt(TOPIC_CMD_HYDRO, "").unwrap(),
            RemoteCommand::ToggleHydroMix
        );
        assert_eq!(
            RemoteCommand::from_mqtt(TOPIC_CMD_FILL, "ON").unwrap(),
            RemoteCommand::SetEquipment {
                equipment: Equipment::Fill,
                on: true
            }
        );
        assert!(RemoteCommand::from_mqtt(TOPIC_CMD_FILL, "maybe").is_err());
    }

    #[test]
    fn settings_must_be_an_object() {
        let cmd = RemoteCommand::from_mqtt(TOPIC_SET_SETTINGS, r#"{"minTemp": 17}"#).unwrap();
        assert_eq!(cmd.label(), "settings_update");
        assert!(matches!(
            RemoteCommand::from_mqtt(TOPIC_CMD_SETTINGS, "[1,2]"),
            Err(CommandError::Malformed(_))
        ));
        assert!(matches!(
            RemoteCommand::from_mqtt("greenhouse/cmd/reboot", "1"),
            Err(CommandError::UnknownTopic(_))
        ));
    }
}
