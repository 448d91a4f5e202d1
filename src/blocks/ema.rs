use super::{BinarySensorDescription, NumberDescription, RegisterBlockDescriptor, SensorDescription};
use crate::keys::{BinarySensorAttrKey as B, DeviceKey, NumberAttrKey as N, SensorAttrKey as S};
use crate::registers::enums::EmergencyMode;
use crate::registers::RegisterInputDescriptor as D;

use DeviceKey::*;

/// Signed power value the heater follows while load feed-in is enabled.
pub const EMA_FEED_IN_VALUE_NUMBER: NumberDescription = NumberDescription {
    key: N::EmaFeedInValue,
    descriptor: D::signed(3),
    device_key: Some(EnergyManager),
    min: -30000.0,
    max: 30000.0,
    step: 1.0,
    unit: Some("W"),
};

const fn status(key: B, bit: u8, device: DeviceKey) -> BinarySensorDescription {
    BinarySensorDescription {
        key,
        descriptor: D::flag(0, bit),
        device_key: Some(device),
        inverted: false,
    }
}

const fn temperature(key: S, register: u16, device: DeviceKey) -> SensorDescription {
    SensorDescription {
        key,
        descriptor: D::float32(register),
        device_key: Some(device),
        unit: Some("°C"),
        min: None,
        max: None,
    }
}

/// Live status and the values an energy manager steers the heater with.
pub static EMA_REGISTER_BLOCK_DESCRIPTOR: RegisterBlockDescriptor = RegisterBlockDescriptor {
    name: "ema",
    starting_register: 300,
    number_of_registers: 47,
    binary_sensors: &[
        status(B::EmaHeater1Active, 0, WaterHeaterControlUnit),
        status(B::EmaHeater2Active, 1, WaterHeaterControlUnit),
        status(B::EmaHeater3Active, 2, WaterHeaterControlUnit),
        status(B::EmaPumpActive, 3, WaterHeaterControlUnit),
        status(B::EmaRelayBoardConnected, 4, WaterHeaterControlUnit),
        status(B::EmaEmergencyModeActive, 6, WaterHeaterControlUnit),
        status(B::EmaLegionellaProtectionActive, 7, LegionellaProtectionUnit),
        status(B::EmaAnalogInputActive, 8, AnalogInputControl),
        status(B::EmaSetpointActive, 9, EnergyManager),
        status(B::EmaLoadFeedInActive, 10, EnergyManager),
        status(B::EmaAutoheaterActive, 11, EnergyManager),
        status(B::EmaPumpRelayActive, 12, HeatPumpControlUnit),
        status(B::EmaTemperatureLimitReached, 13, WaterHeaterControlUnit),
        status(B::EmaErrorOccurred, 15, WaterHeaterControlUnit),
    ],
    sensors: &[
        SensorDescription {
            key: S::EmaHeaterLoad,
            descriptor: D::unsigned(4),
            device_key: Some(WaterHeaterControlUnit),
            unit: Some("W"),
            min: Some(0.0),
            max: Some(30000.0),
        },
        SensorDescription {
            key: S::EmaCurrentHeaterStep,
            descriptor: D::unsigned(5),
            device_key: Some(WaterHeaterControlUnit),
            unit: None,
            min: Some(0.0),
            max: Some(7.0),
        },
        SensorDescription {
            key: S::EmaAnalogInputVoltage,
            descriptor: D::float32(17),
            device_key: Some(AnalogInputControl),
            unit: Some("V"),
            min: Some(0.0),
            max: Some(10.0),
        },
        temperature(S::EmaInternalTemperature, 19, WaterHeaterControlUnit),
        temperature(S::EmaExternalTemperature, 21, WaterHeaterControlUnit),
        temperature(S::EmaBufferTemperature, 23, WaterHeaterControlUnit),
        temperature(S::EmaLegionellaTemperature, 25, LegionellaProtectionUnit),
        SensorDescription {
            key: S::EmaEmergencyMode,
            descriptor: D::int_enum::<EmergencyMode>(40),
            device_key: Some(WaterHeaterControlUnit),
            unit: None,
            min: None,
            max: None,
        },
    ],
    switches: &[],
    number_inputs: &[
        NumberDescription {
            key: N::EmaSetHeaterStep,
            descriptor: D::unsigned(1),
            device_key: Some(EnergyManager),
            min: 0.0,
            max: 7.0,
            step: 1.0,
            unit: None,
        },
        NumberDescription {
            key: N::EmaLoadSetpointValue,
            descriptor: D::unsigned(2),
            device_key: Some(EnergyManager),
            min: 0.0,
            max: 30000.0,
            step: 1.0,
            unit: Some("W"),
        },
        EMA_FEED_IN_VALUE_NUMBER,
    ],
    text_inputs: &[],
    time_inputs: &[],
    select_inputs: &[],
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::Value;

    #[test]
    fn feed_in_value_is_signed_at_303() {
        let block = &EMA_REGISTER_BLOCK_DESCRIPTOR;
        let d = EMA_FEED_IN_VALUE_NUMBER.descriptor;
        assert_eq!(block.absolute_register_index(&d), 303);
        let mut registers = vec![0u16; 47];
        registers[3] = 0xFFA1;
        assert_eq!(d.decode(&registers), Ok(Value::I16(-95)));
    }

    #[test]
    fn temperatures_are_floats() {
        let mut registers = vec![0u16; 47];
        registers[19] = 0x4120;
        let d = block_descriptor(S::EmaInternalTemperature);
        assert_eq!(d.decode(&registers), Ok(Value::F32(10.0)));
        registers[40] = 2;
        let d = block_descriptor(S::EmaEmergencyMode);
        assert_eq!(d.decode(&registers), Ok(Value::Enum("sensor_fault")));
    }

    fn block_descriptor(key: S) -> D {
        EMA_REGISTER_BLOCK_DESCRIPTOR
            .entity(key.into())
            .and_then(|e| e.descriptor().copied())
            .unwrap()
    }
}
