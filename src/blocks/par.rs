use super::{BinarySensorDescription, RegisterBlockDescriptor, SensorDescription};
use crate::keys::{BinarySensorAttrKey as B, DeviceKey, SensorAttrKey as S};
use crate::registers::RegisterInputDescriptor as D;

const DEVICE: Option<DeviceKey> = Some(DeviceKey::WaterHeaterControlUnit);

const fn text(key: S, descriptor: D) -> SensorDescription {
    SensorDescription { key, descriptor, device_key: DEVICE, unit: None, min: None, max: None }
}

const fn watts(key: S, register: u16, min: f64, max: f64) -> SensorDescription {
    SensorDescription {
        key,
        descriptor: D::unsigned(register),
        device_key: DEVICE,
        unit: Some("W"),
        min: Some(min),
        max: Some(max),
    }
}

const fn type_flag(key: B, bit: u8) -> BinarySensorDescription {
    BinarySensorDescription {
        key,
        descriptor: D::flag(16, bit),
        device_key: DEVICE,
        inverted: false,
    }
}

/// Static description of the installed heater.
pub static PAR_REGISTER_BLOCK_DESCRIPTOR: RegisterBlockDescriptor = RegisterBlockDescriptor {
    name: "par",
    starting_register: 400,
    number_of_registers: 56,
    sensors: &[
        text(S::ParId, D::string(0, 16)),
        watts(S::ParHeater1Power, 17, 250.0, 10000.0),
        watts(S::ParHeater2Power, 18, 250.0, 10000.0),
        watts(S::ParHeater3Power, 19, 250.0, 10000.0),
        text(S::ParArticleNumber, D::string(20, 8)),
        text(S::ParArticleName, D::string(28, 16)),
        text(S::ParSoftwareVersion, D::string(44, 3)),
        text(S::ParHardwareVersion, D::string(47, 3)),
        watts(S::ParHeater4Power, 50, 250.0, 10000.0),
        watts(S::ParHeater5Power, 51, 250.0, 10000.0),
        watts(S::ParHeater6Power, 52, 250.0, 10000.0),
        SensorDescription {
            key: S::ParNumberOfSteps,
            descriptor: D::unsigned(53),
            device_key: DEVICE,
            unit: None,
            min: Some(6.0),
            max: Some(19.0),
        },
        SensorDescription {
            key: S::ParNumberOfHeater,
            descriptor: D::unsigned(54),
            device_key: DEVICE,
            unit: None,
            min: Some(3.0),
            max: Some(6.0),
        },
        watts(S::ParMaxPower, 55, 1750.0, 20000.0),
    ],
    binary_sensors: &[
        type_flag(B::ParType3StageVersion, 0),
        type_flag(B::ParType7StageVersion, 1),
        type_flag(B::ParHeaterTypeFlange, 2),
        type_flag(B::ParHeaterTypeScrewIn, 3),
        type_flag(B::ParWiredAsStarConnection, 4),
        type_flag(B::ParWiredAsDeltaConnection, 5),
        // bit 6 is reserved
        type_flag(B::ParTypeOemVersion, 7),
    ],
    switches: &[],
    number_inputs: &[],
    text_inputs: &[],
    time_inputs: &[],
    select_inputs: &[],
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::AttrKey;
    use crate::registers::Value;

    #[test]
    fn decodes_type_flags_and_identity() {
        let mut registers = vec![0u16; 56];
        registers[0] = u16::from_be_bytes(*b"AS");
        registers[1] = u16::from_be_bytes(*b"K1");
        registers[2] = u16::from_be_bytes(*b"23");
        registers[16] = 0b1000_0101;
        registers[17] = 2000;
        let block = &PAR_REGISTER_BLOCK_DESCRIPTOR;
        let decode = |key: AttrKey| {
            block.entity(key).and_then(|e| e.descriptor()).unwrap().decode(&registers)
        };
        let get = |key: S| decode(key.into());
        assert_eq!(get(S::ParId), Ok(Value::Str("ASK123".into())));
        assert_eq!(get(S::ParHeater1Power), Ok(Value::U16(2000)));
        let flag = |key: B| decode(key.into());
        assert_eq!(flag(B::ParType3StageVersion), Ok(Value::Bool(true)));
        assert_eq!(flag(B::ParType7StageVersion), Ok(Value::Bool(false)));
        assert_eq!(flag(B::ParHeaterTypeFlange), Ok(Value::Bool(true)));
        assert_eq!(flag(B::ParTypeOemVersion), Ok(Value::Bool(true)));
    }
}
