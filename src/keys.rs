use std::str::FromStr;

macro_rules! attr_keys {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($(#[$vmeta:meta])* $variant:ident,)* }) => {
        $(#[$meta])*
        #[derive(
            Clone,
            Copy,
            Debug,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            strum::Display,
            strum::EnumString,
            strum::IntoStaticStr,
            strum::VariantArray,
        )]
        #[strum(serialize_all = "snake_case")]
        $vis enum $name {
            $($(#[$vmeta])* $variant,)*
        }
    };
}

attr_keys! {
    /// Binary sensor attribute keys.
    pub enum BinarySensorAttrKey {
        ParType3StageVersion,
        ParType7StageVersion,
        ParHeaterTypeFlange,
        ParHeaterTypeScrewIn,
        ParWiredAsStarConnection,
        ParWiredAsDeltaConnection,
        ParTypeOemVersion,
        EmaHeater1Active,
        EmaHeater2Active,
        EmaHeater3Active,
        EmaPumpActive,
        EmaRelayBoardConnected,
        EmaEmergencyModeActive,
        EmaLegionellaProtectionActive,
        EmaAnalogInputActive,
        EmaSetpointActive,
        EmaLoadFeedInActive,
        EmaAutoheaterActive,
        EmaPumpRelayActive,
        EmaTemperatureLimitReached,
        EmaErrorOccurred,
    }
}

attr_keys! {
    /// Sensor attribute keys.
    pub enum SensorAttrKey {
        ParId,
        ParHeater1Power,
        ParHeater2Power,
        ParHeater3Power,
        ParArticleNumber,
        ParArticleName,
        ParSoftwareVersion,
        ParHardwareVersion,
        ParHeater4Power,
        ParHeater5Power,
        ParHeater6Power,
        ParNumberOfSteps,
        ParNumberOfHeater,
        ParMaxPower,
        EmaHeaterLoad,
        EmaCurrentHeaterStep,
        EmaAnalogInputVoltage,
        EmaInternalTemperature,
        EmaExternalTemperature,
        EmaBufferTemperature,
        EmaLegionellaTemperature,
        EmaEmergencyMode,
    }
}

attr_keys! {
    /// Switch attribute keys.
    pub enum SwitchAttrKey {
        ConfAnalogInputEnabled,
        ConfHeatpumpRequestEnabled,
        ConfEmergencyModeEnabled,
        ConfAutoheaterEnabled,
        ConfLegionellaProtectionEnabled,
        ConfLoadSetpointEnabled,
        ConfLoadFeedInEnabled,
        ConfTemperatureLimitEnabled,
        /// Synthetic switch driving the auto feed-in; has no register of its own.
        EmaAutoFeedInSwitch,
    }
}

attr_keys! {
    /// Number attribute keys.
    pub enum NumberAttrKey {
        EmaSetHeaterStep,
        EmaLoadSetpointValue,
        EmaFeedInValue,
        /// Locally held offset added to every forwarded feed-in value.
        EmaAutoFeedInBuffer,
        ConfRtuSlaveId,
        ConfAutoFeedInDelay,
        ConfLegionellaProtectionTemperature,
        ConfAutoheaterTemperature,
        ConfAnalogInputHysteresis,
        ConfTemperatureOffset,
    }
}

attr_keys! {
    /// Text attribute keys.
    pub enum TextAttrKey {
        ConfInstallationName,
    }
}

attr_keys! {
    /// Time attribute keys.
    pub enum TimeAttrKey {
        ConfLegionellaPreferredTime,
        ConfAutoheaterOnTime,
        ConfAutoheaterOffTime,
    }
}

attr_keys! {
    /// Select attribute keys.
    pub enum SelectAttrKey {
        ConfRtuBaudrate,
        ConfRtuParity,
        ConfLegionellaInterval,
        ConfEnergyMeterType,
    }
}

/// The kind of entity a value is exposed as.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::VariantArray,
)]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    BinarySensor,
    Sensor,
    Switch,
    Number,
    Text,
    Time,
    Select,
}

impl EntityKind {
    /// Whether entities of this kind may be written to.
    pub const fn is_writable(&self) -> bool {
        !matches!(self, Self::BinarySensor | Self::Sensor)
    }
}

/// Physical or logical device units an entity belongs to.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Deserialize,
    serde::Serialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::VariantArray,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceKey {
    WaterHeaterControlUnit,
    EnergyManager,
    LegionellaProtectionUnit,
    AnalogInputControl,
    HeatPumpControlUnit,
    ModbusMaster,
}

/// A key naming one value across all entity kinds.
///
/// The string form is `<kind>.<key>`, e.g. `sensor.par_heater1_power`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttrKey {
    BinarySensor(BinarySensorAttrKey),
    Sensor(SensorAttrKey),
    Switch(SwitchAttrKey),
    Number(NumberAttrKey),
    Text(TextAttrKey),
    Time(TimeAttrKey),
    Select(SelectAttrKey),
}

impl AttrKey {
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::BinarySensor(_) => EntityKind::BinarySensor,
            Self::Sensor(_) => EntityKind::Sensor,
            Self::Switch(_) => EntityKind::Switch,
            Self::Number(_) => EntityKind::Number,
            Self::Text(_) => EntityKind::Text,
            Self::Time(_) => EntityKind::Time,
            Self::Select(_) => EntityKind::Select,
        }
    }

    /// The key without its kind prefix.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BinarySensor(k) => k.into(),
            Self::Sensor(k) => k.into(),
            Self::Switch(k) => k.into(),
            Self::Number(k) => k.into(),
            Self::Text(k) => k.into(),
            Self::Time(k) => k.into(),
            Self::Select(k) => k.into(),
        }
    }
}

impl std::fmt::Display for AttrKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind(), self.name())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParseKeyError {
    #[error("`{0}` is not of the form `<kind>.<key>`")]
    MissingKind(String),
    #[error("`{0}` is not a known entity kind")]
    UnknownKind(String),
    #[error("`{1}` is not a known {0} key")]
    UnknownKey(EntityKind, String),
}

impl FromStr for AttrKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((kind, key)) = s.split_once('.') else {
            return Err(ParseKeyError::MissingKind(s.to_string()));
        };
        let kind =
            EntityKind::from_str(kind).map_err(|_| ParseKeyError::UnknownKind(kind.to_string()))?;
        let unknown = |_| ParseKeyError::UnknownKey(kind, key.to_string());
        Ok(match kind {
            EntityKind::BinarySensor => Self::BinarySensor(key.parse().map_err(unknown)?),
            EntityKind::Sensor => Self::Sensor(key.parse().map_err(unknown)?),
            EntityKind::Switch => Self::Switch(key.parse().map_err(unknown)?),
            EntityKind::Number => Self::Number(key.parse().map_err(unknown)?),
            EntityKind::Text => Self::Text(key.parse().map_err(unknown)?),
            EntityKind::Time => Self::Time(key.parse().map_err(unknown)?),
            EntityKind::Select => Self::Select(key.parse().map_err(unknown)?),
        })
    }
}

impl serde::Serialize for AttrKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

macro_rules! impl_from_key {
    ($($variant:ident($ty:ty),)*) => {
        $(impl From<$ty> for AttrKey {
            fn from(key: $ty) -> Self {
                Self::$variant(key)
            }
        })*
    };
}

impl_from_key! {
    BinarySensor(BinarySensorAttrKey),
    Sensor(SensorAttrKey),
    Switch(SwitchAttrKey),
    Number(NumberAttrKey),
    Text(TextAttrKey),
    Time(TimeAttrKey),
    Select(SelectAttrKey),
}
