use std::borrow::Borrow;

/// Raw value ↔ member name mapping of one enumeration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnumTable<R: 'static> {
    members: &'static [(R, &'static str)],
}

impl<R: Copy + PartialEq + 'static> EnumTable<R> {
    pub const fn new(members: &'static [(R, &'static str)]) -> Self {
        Self { members }
    }

    pub fn iter(&self) -> std::slice::Iter<'static, (R, &'static str)> {
        self.members.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        self.members.iter().map(|&(_, name)| name)
    }

    /// Member name for a raw register value, `None` if the value is outside of the set.
    pub fn name_of<Q>(&self, raw: &Q) -> Option<&'static str>
    where
        R: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.members.iter().find(|(r, _)| r.borrow() == raw).map(|&(_, name)| name)
    }

    pub fn raw_of(&self, name: &str) -> Option<R> {
        self.members.iter().find(|(_, n)| *n == name).map(|&(raw, _)| raw)
    }

    /// The table's own `'static` copy of `name`, if it is a member.
    pub fn member(&self, name: &str) -> Option<&'static str> {
        self.members.iter().find(|(_, n)| *n == name).map(|&(_, n)| n)
    }
}

/// A typed enumeration backed by an [`EnumTable`].
pub trait RegisterEnum: Sized + Copy + 'static {
    type Raw: Copy + PartialEq + 'static;
    const TABLE: EnumTable<Self::Raw>;

    fn from_name(name: &str) -> Option<Self>;
    fn name(&self) -> &'static str;
}

macro_rules! register_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: u8 {
            $($variant:ident = $value:literal as $label:literal),* $(,)?
        }
    ) => {
        #[derive(
            Clone,
            Copy,
            Debug,
            PartialEq,
            Eq,
            strum::EnumString,
            strum::IntoStaticStr,
            strum::VariantArray,
        )]
        #[repr(u8)]
        $(#[$meta])*
        $vis enum $name {
            $(#[strum(serialize = $label)] $variant = $value),*
        }

        $crate::registers::enums::register_enum!(@impl $name, u8, [$(($value, $label)),*]);
    };
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: str {
            $($variant:ident = $value:literal),* $(,)?
        }
    ) => {
        #[derive(
            Clone,
            Copy,
            Debug,
            PartialEq,
            Eq,
            strum::EnumString,
            strum::IntoStaticStr,
            strum::VariantArray,
        )]
        $(#[$meta])*
        $vis enum $name {
            $(#[strum(serialize = $value)] $variant),*
        }

        $crate::registers::enums::register_enum!(
            @impl $name, &'static str, [$(($value, $value)),*]
        );
    };
    (@impl $name:ident, $raw:ty, [$(($value:literal, $label:literal)),*]) => {
        impl $crate::registers::enums::RegisterEnum for $name {
            type Raw = $raw;
            const TABLE: $crate::registers::enums::EnumTable<$raw> =
                $crate::registers::enums::EnumTable::new(&[$(($value, $label)),*]);

            fn from_name(name: &str) -> Option<Self> {
                <Self as std::str::FromStr>::from_str(name).ok()
            }

            fn name(&self) -> &'static str {
                <&'static str>::from(*self)
            }
        }
    };
}

pub(crate) use register_enum;

register_enum! {
    /// How often the legionella protection heats the tank up.
    pub enum LegionellaInterval: u8 {
        Daily = 0 as "daily",
        Weekly = 1 as "weekly",
        Fortnightly = 2 as "fortnightly",
        Monthly = 3 as "monthly",
    }
}

register_enum! {
    pub enum RtuBaudrate: u8 {
        B1200 = 0 as "1200",
        B2400 = 1 as "2400",
        B4800 = 2 as "4800",
        B9600 = 3 as "9600",
        B19200 = 4 as "19200",
        B38400 = 5 as "38400",
        B57600 = 6 as "57600",
        B115200 = 7 as "115200",
    }
}

register_enum! {
    /// Data bits, parity and stop bits of the RTU slave interface.
    pub enum RtuParity: u8 {
        EvenOneStopBit = 0 as "8e1",
        OddOneStopBit = 1 as "8o1",
        NoneTwoStopBits = 2 as "8n2",
        NoneOneStopBit = 3 as "8n1",
    }
}

register_enum! {
    pub enum EmergencyMode: u8 {
        Inactive = 0 as "inactive",
        LowTemperature = 1 as "low_temperature",
        SensorFault = 2 as "sensor_fault",
        CommunicationLoss = 3 as "communication_loss",
    }
}

register_enum! {
    /// Energy meter the device reads grid power from when acting as modbus master.
    pub enum EnergyMeterType: str {
        NoMeter = "NONE",
        Sma = "SMA",
        Fronius = "FRONIUS",
        SolarEdge = "SOLAREDGE",
        Kostal = "KOSTAL",
    }
}
