pub mod conf;
pub mod ema;
pub mod par;

use std::collections::BTreeSet;

use crate::keys::{
    AttrKey, BinarySensorAttrKey, DeviceKey, EntityKind, NumberAttrKey, SelectAttrKey,
    SensorAttrKey, SwitchAttrKey, TextAttrKey, TimeAttrKey,
};
use crate::registers::{ParseValueError, RegisterInputDescriptor, Value};

/// Largest amount of holding registers that can be read with a single request.
pub const MAX_SAFE_READ_COUNT: u16 = 123;

pub use conf::CONF_REGISTER_BLOCK_DESCRIPTOR;
pub use ema::EMA_REGISTER_BLOCK_DESCRIPTOR;
pub use par::PAR_REGISTER_BLOCK_DESCRIPTOR;

/// All blocks of the device.
pub static BLOCKS: [&RegisterBlockDescriptor; 3] = [
    &PAR_REGISTER_BLOCK_DESCRIPTOR,
    &EMA_REGISTER_BLOCK_DESCRIPTOR,
    &CONF_REGISTER_BLOCK_DESCRIPTOR,
];

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error(
        "`{key}` spans registers {start}..{end}, past the end of the {len} register long block"
    )]
    DescriptorOutOfBounds { key: AttrKey, start: u16, end: u32, len: u16 },
    #[error("`{key}` refers to bit {bit}, registers only have 16")]
    InvalidBit { key: AttrKey, bit: u8 },
    #[error("`{0}` is a zero-length string")]
    EmptyString(AttrKey),
    #[error("`{0}` is declared more than once")]
    DuplicateKey(AttrKey),
    #[error("`{0}` is a select without an enumeration")]
    SelectWithoutEnum(AttrKey),
    #[error("block of {0} registers cannot be read in a single request")]
    BlockTooLarge(u16),
    #[error("block starting at {start} with {len} registers exceeds the register address space")]
    AddressOverflow { start: u16, len: u16 },
}

#[derive(Clone, Copy, Debug)]
pub struct BinarySensorDescription {
    pub key: BinarySensorAttrKey,
    pub descriptor: RegisterInputDescriptor,
    pub device_key: Option<DeviceKey>,
    pub inverted: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct SensorDescription {
    pub key: SensorAttrKey,
    pub descriptor: RegisterInputDescriptor,
    pub device_key: Option<DeviceKey>,
    pub unit: Option<&'static str>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// The register value a switch writes to be turned on or off.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SwitchState {
    Bool(bool),
    Int(u16),
}

impl SwitchState {
    pub fn to_value(self) -> Value {
        match self {
            SwitchState::Bool(b) => Value::Bool(b),
            SwitchState::Int(n) => Value::U16(n),
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            SwitchState::Bool(b) => value.as_bool() == Some(b),
            SwitchState::Int(n) => value.as_f64() == Some(f64::from(n)),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SwitchDescription {
    pub key: SwitchAttrKey,
    /// `None` for switches that are synthesized from other values.
    pub descriptor: Option<RegisterInputDescriptor>,
    pub device_key: Option<DeviceKey>,
    pub on_state: SwitchState,
    pub off_state: SwitchState,
    pub inverted: bool,
}

impl SwitchDescription {
    /// Whether a decoded register value means the switch is on.
    pub fn is_on(&self, value: &Value) -> bool {
        let is_on_state = self.on_state.matches(value);
        if self.inverted { !is_on_state } else { is_on_state }
    }

    /// The value to write for the requested switch position.
    pub fn state_for(&self, on: bool) -> SwitchState {
        match (on, self.inverted) {
            (true, false) | (false, true) => self.on_state,
            (false, false) | (true, true) => self.off_state,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct NumberDescription {
    pub key: NumberAttrKey,
    pub descriptor: RegisterInputDescriptor,
    pub device_key: Option<DeviceKey>,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub unit: Option<&'static str>,
}

impl NumberDescription {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TextDescription {
    pub key: TextAttrKey,
    pub descriptor: RegisterInputDescriptor,
    pub device_key: Option<DeviceKey>,
}

#[derive(Clone, Copy, Debug)]
pub struct TimeDescription {
    pub key: TimeAttrKey,
    pub descriptor: RegisterInputDescriptor,
    pub device_key: Option<DeviceKey>,
}

#[derive(Clone, Copy, Debug)]
pub struct SelectDescription {
    pub key: SelectAttrKey,
    pub descriptor: RegisterInputDescriptor,
    pub device_key: Option<DeviceKey>,
}

impl SelectDescription {
    /// The options a user may pick from.
    pub fn options(&self) -> Vec<&'static str> {
        match self.descriptor {
            RegisterInputDescriptor::IntEnum { values, .. } => values.names().collect(),
            RegisterInputDescriptor::StrEnum { values, .. } => values.names().collect(),
            _ => Vec::new(),
        }
    }
}

/// A borrowed entity description of any kind.
#[derive(Clone, Copy, Debug)]
pub enum Entity<'a> {
    BinarySensor(&'a BinarySensorDescription),
    Sensor(&'a SensorDescription),
    Switch(&'a SwitchDescription),
    Number(&'a NumberDescription),
    Text(&'a TextDescription),
    Time(&'a TimeDescription),
    Select(&'a SelectDescription),
}

impl<'a> Entity<'a> {
    pub fn key(&self) -> AttrKey {
        match self {
            Entity::BinarySensor(e) => e.key.into(),
            Entity::Sensor(e) => e.key.into(),
            Entity::Switch(e) => e.key.into(),
            Entity::Number(e) => e.key.into(),
            Entity::Text(e) => e.key.into(),
            Entity::Time(e) => e.key.into(),
            Entity::Select(e) => e.key.into(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.key().kind()
    }

    pub fn descriptor(&self) -> Option<&'a RegisterInputDescriptor> {
        match *self {
            Entity::BinarySensor(e) => Some(&e.descriptor),
            Entity::Sensor(e) => Some(&e.descriptor),
            Entity::Switch(e) => e.descriptor.as_ref(),
            Entity::Number(e) => Some(&e.descriptor),
            Entity::Text(e) => Some(&e.descriptor),
            Entity::Time(e) => Some(&e.descriptor),
            Entity::Select(e) => Some(&e.descriptor),
        }
    }

    pub fn device_key(&self) -> Option<DeviceKey> {
        match self {
            Entity::BinarySensor(e) => e.device_key,
            Entity::Sensor(e) => e.device_key,
            Entity::Switch(e) => e.device_key,
            Entity::Number(e) => e.device_key,
            Entity::Text(e) => e.device_key,
            Entity::Time(e) => e.device_key,
            Entity::Select(e) => e.device_key,
        }
    }

    /// Parse user input into a value this entity can be written with.
    ///
    /// Switches take on/off rather than their raw register states.
    pub fn parse_value(&self, s: &str) -> Result<Value, ParseValueError> {
        match (self, self.descriptor()) {
            (Entity::Switch(_), _) | (_, None) => {
                RegisterInputDescriptor::flag(0, 0).parse_value(s)
            }
            (_, Some(descriptor)) => descriptor.parse_value(s),
        }
    }

    /// Entities without a device are always active, others only if their device is supported.
    pub fn is_supported_by(&self, devices: &BTreeSet<DeviceKey>) -> bool {
        self.device_key().is_none_or(|d| devices.contains(&d))
    }
}

/// A contiguous range of registers and the entities that are decoded from it.
#[derive(Debug)]
pub struct RegisterBlockDescriptor {
    pub name: &'static str,
    /// Absolute address of the first register.
    pub starting_register: u16,
    pub number_of_registers: u16,
    pub binary_sensors: &'static [BinarySensorDescription],
    pub sensors: &'static [SensorDescription],
    pub switches: &'static [SwitchDescription],
    pub number_inputs: &'static [NumberDescription],
    pub text_inputs: &'static [TextDescription],
    pub time_inputs: &'static [TimeDescription],
    pub select_inputs: &'static [SelectDescription],
}

impl RegisterBlockDescriptor {
    pub const fn absolute_register_index(&self, descriptor: &RegisterInputDescriptor) -> u16 {
        self.starting_register + descriptor.starting_register()
    }

    /// Every entity of the block, grouped by kind.
    pub fn entities(&self) -> impl Iterator<Item = Entity<'static>> + use<> {
        let Self {
            binary_sensors,
            sensors,
            switches,
            number_inputs,
            text_inputs,
            time_inputs,
            select_inputs,
            ..
        } = *self;
        binary_sensors
            .iter()
            .map(Entity::BinarySensor)
            .chain(sensors.iter().map(Entity::Sensor))
            .chain(switches.iter().map(Entity::Switch))
            .chain(number_inputs.iter().map(Entity::Number))
            .chain(text_inputs.iter().map(Entity::Text))
            .chain(time_inputs.iter().map(Entity::Time))
            .chain(select_inputs.iter().map(Entity::Select))
    }

    pub fn entities_of(&self, kind: EntityKind) -> impl Iterator<Item = Entity<'static>> + use<> {
        self.entities().filter(move |e| e.kind() == kind)
    }

    pub fn entity(&self, key: AttrKey) -> Option<Entity<'static>> {
        self.entities().find(|e| e.key() == key)
    }

    /// Whether the register range of `descriptor` lies within this block.
    pub fn contains(&self, descriptor: &RegisterInputDescriptor) -> bool {
        u32::from(descriptor.starting_register()) + u32::from(descriptor.word_span())
            <= u32::from(self.number_of_registers)
    }

    /// Check the block's static layout.
    ///
    /// Every descriptor must fit inside the block and every key must be unique.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.number_of_registers > MAX_SAFE_READ_COUNT {
            return Err(ConfigurationError::BlockTooLarge(self.number_of_registers));
        }
        if self.starting_register.checked_add(self.number_of_registers).is_none() {
            return Err(ConfigurationError::AddressOverflow {
                start: self.starting_register,
                len: self.number_of_registers,
            });
        }
        let mut seen = BTreeSet::new();
        for entity in self.entities() {
            let key = entity.key();
            if !seen.insert(key) {
                return Err(ConfigurationError::DuplicateKey(key));
            }
            if let Entity::Select(select) = entity {
                if !matches!(
                    select.descriptor,
                    RegisterInputDescriptor::IntEnum { .. }
                        | RegisterInputDescriptor::StrEnum { .. }
                ) {
                    return Err(ConfigurationError::SelectWithoutEnum(key));
                }
            }
            let Some(descriptor) = entity.descriptor() else { continue };
            if let RegisterInputDescriptor::Flag { bit, .. } = *descriptor {
                if bit > 15 {
                    return Err(ConfigurationError::InvalidBit { key, bit });
                }
            }
            if descriptor.word_span() == 0 {
                return Err(ConfigurationError::EmptyString(key));
            }
            if !self.contains(descriptor) {
                let start = descriptor.starting_register();
                return Err(ConfigurationError::DescriptorOutOfBounds {
                    key,
                    start,
                    end: u32::from(start) + u32::from(descriptor.word_span()),
                    len: self.number_of_registers,
                });
            }
        }
        Ok(())
    }
}
