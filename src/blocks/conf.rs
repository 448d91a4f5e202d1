use super::{
    NumberDescription, RegisterBlockDescriptor, SelectDescription, SwitchDescription, SwitchState,
    TextDescription, TimeDescription,
};
use crate::keys::{
    DeviceKey, NumberAttrKey as N, SelectAttrKey as Sel, SwitchAttrKey as Sw, TextAttrKey,
    TimeAttrKey as T,
};
use crate::registers::RegisterInputDescriptor as D;
use crate::registers::enums::{EnergyMeterType, LegionellaInterval, RtuBaudrate, RtuParity};

use DeviceKey::*;

const fn flag_switch(key: Sw, register: u16, bit: u8, device: DeviceKey) -> SwitchDescription {
    SwitchDescription {
        key,
        descriptor: Some(D::flag(register, bit)),
        device_key: Some(device),
        on_state: SwitchState::Bool(true),
        off_state: SwitchState::Bool(false),
        inverted: false,
    }
}

/// Enables the heater to follow the energy manager's feed-in value.
pub const CONF_FEED_IN_ENABLED_SWITCH: SwitchDescription =
    flag_switch(Sw::ConfLoadFeedInEnabled, 1, 1, EnergyManager);

const fn number(
    key: N,
    descriptor: D,
    device_key: Option<DeviceKey>,
    min: f64,
    max: f64,
    unit: Option<&'static str>,
) -> NumberDescription {
    NumberDescription { key, descriptor, device_key, min, max, step: 1.0, unit }
}

/// Persistent settings of the heater.
pub static CONF_REGISTER_BLOCK_DESCRIPTOR: RegisterBlockDescriptor = RegisterBlockDescriptor {
    name: "conf",
    starting_register: 500,
    number_of_registers: 60,
    binary_sensors: &[],
    sensors: &[],
    switches: &[
        flag_switch(Sw::ConfAnalogInputEnabled, 0, 0, AnalogInputControl),
        flag_switch(Sw::ConfHeatpumpRequestEnabled, 0, 1, HeatPumpControlUnit),
        flag_switch(Sw::ConfEmergencyModeEnabled, 0, 2, WaterHeaterControlUnit),
        flag_switch(Sw::ConfAutoheaterEnabled, 0, 3, EnergyManager),
        flag_switch(Sw::ConfLegionellaProtectionEnabled, 0, 4, LegionellaProtectionUnit),
        flag_switch(Sw::ConfLoadSetpointEnabled, 1, 0, EnergyManager),
        CONF_FEED_IN_ENABLED_SWITCH,
        flag_switch(Sw::ConfTemperatureLimitEnabled, 1, 2, WaterHeaterControlUnit),
    ],
    number_inputs: &[
        number(N::ConfRtuSlaveId, D::byte(4), None, 1.0, 247.0, None),
        number(N::ConfAutoFeedInDelay, D::unsigned(5), Some(EnergyManager), 0.0, 3600.0, Some("s")),
        number(
            N::ConfLegionellaProtectionTemperature,
            D::byte(6),
            Some(LegionellaProtectionUnit),
            50.0,
            65.0,
            Some("°C"),
        ),
        number(
            N::ConfAutoheaterTemperature,
            D::byte(10),
            Some(EnergyManager),
            0.0,
            95.0,
            Some("°C"),
        ),
        NumberDescription {
            key: N::ConfAnalogInputHysteresis,
            descriptor: D::float32(15),
            device_key: Some(AnalogInputControl),
            min: 0.0,
            max: 10.0,
            step: 0.1,
            unit: Some("V"),
        },
        number(
            N::ConfTemperatureOffset,
            D::signed(17),
            Some(WaterHeaterControlUnit),
            -10.0,
            10.0,
            Some("°C"),
        ),
    ],
    text_inputs: &[TextDescription {
        key: TextAttrKey::ConfInstallationName,
        descriptor: D::string(20, 16),
        device_key: None,
    }],
    time_inputs: &[
        TimeDescription {
            key: T::ConfLegionellaPreferredTime,
            descriptor: D::time(8),
            device_key: Some(LegionellaProtectionUnit),
        },
        TimeDescription {
            key: T::ConfAutoheaterOnTime,
            descriptor: D::time(11),
            device_key: Some(EnergyManager),
        },
        TimeDescription {
            key: T::ConfAutoheaterOffTime,
            descriptor: D::time(13),
            device_key: Some(EnergyManager),
        },
    ],
    select_inputs: &[
        SelectDescription {
            key: Sel::ConfRtuBaudrate,
            descriptor: D::int_enum::<RtuBaudrate>(2),
            device_key: None,
        },
        SelectDescription {
            key: Sel::ConfRtuParity,
            descriptor: D::int_enum::<RtuParity>(3),
            device_key: None,
        },
        SelectDescription {
            key: Sel::ConfLegionellaInterval,
            descriptor: D::int_enum::<LegionellaInterval>(7),
            device_key: Some(LegionellaProtectionUnit),
        },
        SelectDescription {
            key: Sel::ConfEnergyMeterType,
            descriptor: D::str_enum::<EnergyMeterType>(36, 8),
            device_key: Some(ModbusMaster),
        },
    ],
};
