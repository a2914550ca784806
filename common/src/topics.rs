pub const TOPIC_SENSOR_SNAPSHOT: &str = "greenhouse/sensors/snapshot";
pub const TOPIC_SENSOR_STATUS: &str = "greenhouse/sensors/status";

pub const TOPIC_TELEMETRY: &str = "greenhouse/esp32/all_sensors";
pub const TOPIC_SETTINGS_STATE: &str = "greenhouse/esp32/settings";
pub const TOPIC_HISTORY: &str = "greenhouse/esp32/history";
pub const TOPIC_CONTROLLER_STATUS: &str = "greenhouse/esp32/status";

pub const TOPIC_SET_SETTINGS: &str = "greenhouse/set_settings";
pub const TOPIC_CMD_PREFIX: &str = "greenhouse/cmd/";
pub const TOPIC_CMD_EQUIPMENT: &str = "greenhouse/cmd/equipment";
pub const TOPIC_CMD_FOG: &str = "greenhouse/cmd/fog";
pub const TOPIC_CMD_WINDOW: &str = "greenhouse/cmd/window";
pub const TOPIC_CMD_HYDRO: &str = "greenhouse/cmd/hydro";
pub const TOPIC_CMD_FILL: &str = "greenhouse/cmd/fill";
pub const TOPIC_CMD_SETTINGS: &str = "greenhouse/cmd/settings";
