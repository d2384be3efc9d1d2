//! Home Assistant MQTT discovery payloads. One retained config message per
//! entity lets a consuming system auto-register everything a device exposes.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::modbus::device::Device;
use crate::modbus::register::{EntityKind, RegisterSpec};

/// The device grouping block shared by all of a device's entities.
#[derive(Clone, Debug, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub name: String,
}

pub fn device_info(device: &Device) -> DeviceInfo {
    DeviceInfo {
        identifiers: vec![device.name.clone()],
        manufacturer: device.kind.manufacturer(),
        model: device.kind.model_name(),
        name: device.name.clone(),
    }
}

#[derive(Debug, Serialize)]
pub struct EntityConfig<'a> {
    pub name: &'static str,
    pub unique_id: String,
    pub state_topic: String,
    pub availability_topic: String,
    pub device: &'a DeviceInfo,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<&'static str>,

    #[serde(skip_serializing_if = "is_empty")]
    pub unit_of_measurement: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<&'static str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<&'static str>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<&'static str>,
}

fn is_empty(s: &&'static str) -> bool {
    s.is_empty()
}

pub fn entity_config<'a>(
    base_topic: &str,
    device: &Device,
    info: &'a DeviceInfo,
    spec: &RegisterSpec,
) -> EntityConfig<'a> {
    let item_topic = format!("{base_topic}/{}/{}", device.name, spec.key);

    let command_topic = spec.writable().then(|| format!("{item_topic}/set"));

    let (min, max) = match spec.entity {
        EntityKind::Number => (spec.min, spec.max),
        _ => (None, None),
    };

    let (payload_on, payload_off) = match spec.entity {
        EntityKind::Switch => (
            spec.options.iter().find(|o| o.0 == "ON").map(|o| o.0),
            spec.options.iter().find(|o| o.0 == "OFF").map(|o| o.0),
        ),
        _ => (None, None),
    };

    let options = match spec.entity {
        EntityKind::Select => spec.options.iter().map(|o| o.0).collect(),
        _ => Vec::new(),
    };

    EntityConfig {
        name: spec.name,
        unique_id: format!("{}_{}", device.name, spec.key),
        state_topic: item_topic.clone(),
        availability_topic: format!("{base_topic}/{}/availability", device.name),
        device: info,
        device_class: spec.device_class,
        state_class: spec.state_class,
        unit_of_measurement: spec.unit,
        command_topic,
        min,
        max,
        payload_on,
        payload_off,
        options,
    }
}

pub fn discovery_topic(prefix: &str, device_name: &str, spec: &RegisterSpec) -> String {
    format!(
        "{prefix}/{}/{device_name}/{}/config",
        spec.entity.component(),
        spec.key
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::modbus::transport::testing::FakeTransport;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn inverter() -> Device {
        let config: DeviceConfig = serde_json::from_value(json!({
            "name": "SG1", "type": "inverter", "transport": "Client1", "unit": 1
        }))
        .unwrap();
        Device::new(&config, FakeTransport::new("Client1").shared()).unwrap()
    }

    fn spec(device: &Device, key: &str) -> RegisterSpec {
        device
            .registers
            .iter()
            .find(|s| s.key == key)
            .unwrap()
            .clone()
    }

    #[test]
    fn sensor_config_has_no_command_surface() {
        let device = inverter();
        let info = device_info(&device);
        let config = entity_config("solar", &device, &info, &spec(&device, "active_power"));

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["state_topic"], json!("solar/SG1/active_power"));
        assert_eq!(value["availability_topic"], json!("solar/SG1/availability"));
        assert_eq!(value["unique_id"], json!("SG1_active_power"));
        assert_eq!(value["device"]["manufacturer"], json!("Sungrow"));
        assert!(value.get("command_topic").is_none());
        assert!(value.get("min").is_none());
    }

    #[test]
    fn number_config_carries_range_and_command_topic() {
        let device = inverter();
        let info = device_info(&device);
        let config = entity_config(
            "solar",
            &device,
            &info,
            &spec(&device, "power_limitation_setting"),
        );

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(
            value["command_topic"],
            json!("solar/SG1/power_limitation_setting/set")
        );
        assert_eq!(value["min"], json!(0.0));
        assert_eq!(value["max"], json!(100.0));
    }

    #[test]
    fn switch_config_uses_on_off_payloads() {
        let device = inverter();
        let info = device_info(&device);
        let config = entity_config(
            "solar",
            &device,
            &info,
            &spec(&device, "power_limitation_switch"),
        );

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["payload_on"], json!("ON"));
        assert_eq!(value["payload_off"], json!("OFF"));
    }

    #[test]
    fn select_config_lists_its_options() {
        let device = inverter();
        let info = device_info(&device);
        let config = entity_config("solar", &device, &info, &spec(&device, "start_stop"));

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["options"], json!(["Start", "Stop"]));
    }

    #[test]
    fn discovery_topic_is_per_component() {
        let device = inverter();
        assert_eq!(
            discovery_topic("homeassistant", "SG1", &spec(&device, "active_power")),
            "homeassistant/sensor/SG1/active_power/config"
        );
        assert_eq!(
            discovery_topic("homeassistant", "SG1", &spec(&device, "start_stop")),
            "homeassistant/select/SG1/start_stop/config"
        );
    }
}
