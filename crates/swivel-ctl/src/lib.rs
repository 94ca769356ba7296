//! Mixer control surface for the swivel virtual playback device.
//!
//! A [`CtlCard`] exposes the four stereo mixer elements a control panel
//! expects from a playback card: Master and PCM volume plus their mute
//! switches. The card fronts a single stream, so the Master and PCM element
//! families address the same stored pair. State is plain get/set with no
//! persistence.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CtlError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CtlError {
    /// Lookup by a name the card does not export.
    #[error("unknown mixer element: {0}")]
    UnknownElement(String),

    /// Enumeration past the end of the element list.
    #[error("element index {index} out of range (card has {count})")]
    IndexOutOfRange { index: usize, count: usize },

    /// Integer range query against a switch element.
    #[error("{elem} has no integer range")]
    NoIntegerRange { elem: &'static str },

    /// Volume write outside the advertised range.
    #[error("{elem} value {value} outside {min}..={max}")]
    ValueOutOfRange {
        elem: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    /// A configuration key this surface does not understand.
    #[error("unknown config key: {0}")]
    UnknownConfigKey(String),

    /// A known configuration key with a value of the wrong kind.
    #[error("invalid config value for {field}: expected {expected}")]
    InvalidConfigValue {
        field: &'static str,
        expected: &'static str,
    },
}

/// Channels per element. Every element is stereo.
pub const CHANNELS: usize = 2;

/// Default volume for both channels after open or reset.
pub const DEFAULT_VOLUME: i64 = 100;

/// Slave control name used when the configuration names none.
pub const DEFAULT_SLAVE_CTL: &str = "default";

/// One raw value from the configuration tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigValue<'a> {
    Str(&'a str),
    Int(i64),
}

/// Parsed control-surface configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtlConfig {
    slave_ctl: String,
}

impl CtlConfig {
    /// Build a configuration from raw key/value pairs.
    ///
    /// `comment` and `type` are bookkeeping keys and skipped. `slavectl`
    /// names the downstream control device and must be a string; absent or
    /// empty resolves to [`DEFAULT_SLAVE_CTL`]. Anything else is an error.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, ConfigValue<'a>)>,
    {
        let mut slave_ctl = None;
        for (key, value) in pairs {
            match key {
                "comment" | "type" => {}
                "slavectl" => match value {
                    ConfigValue::Str(name) => slave_ctl = Some(name.to_owned()),
                    ConfigValue::Int(_) => {
                        return Err(CtlError::InvalidConfigValue {
                            field: "slavectl",
                            expected: "a string",
                        })
                    }
                },
                other => return Err(CtlError::UnknownConfigKey(other.to_owned())),
            }
        }
        let slave_ctl = match slave_ctl {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_SLAVE_CTL.to_owned(),
        };
        Ok(Self { slave_ctl })
    }

    pub fn slave_ctl(&self) -> &str {
        &self.slave_ctl
    }
}

impl Default for CtlConfig {
    fn default() -> Self {
        Self {
            slave_ctl: DEFAULT_SLAVE_CTL.to_owned(),
        }
    }
}

/// Value kind of a mixer element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemType {
    Integer,
    Boolean,
}

/// The four exported elements, in list order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemKey {
    MasterVolume,
    MasterSwitch,
    PcmVolume,
    PcmSwitch,
}

const ELEMS: [ElemKey; 4] = [
    ElemKey::MasterVolume,
    ElemKey::MasterSwitch,
    ElemKey::PcmVolume,
    ElemKey::PcmSwitch,
];

impl ElemKey {
    pub fn name(self) -> &'static str {
        match self {
            ElemKey::MasterVolume => "Master Playback Volume",
            ElemKey::MasterSwitch => "Master Playback Switch",
            ElemKey::PcmVolume => "PCM Playback Volume",
            ElemKey::PcmSwitch => "PCM Playback Switch",
        }
    }

    pub fn elem_type(self) -> ElemType {
        match self {
            ElemKey::MasterVolume | ElemKey::PcmVolume => ElemType::Integer,
            ElemKey::MasterSwitch | ElemKey::PcmSwitch => ElemType::Boolean,
        }
    }

    fn is_volume(self) -> bool {
        self.elem_type() == ElemType::Integer
    }
}

/// Element metadata for the attribute query. All elements are read-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElemAttr {
    pub elem_type: ElemType,
    pub channels: usize,
}

/// Value bounds of an integer element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRange {
    pub min: i64,
    pub max: i64,
    pub step: i64,
}

const VOLUME_RANGE: IntRange = IntRange {
    min: 0,
    max: 100,
    step: 1,
};

/// Identity strings a control panel shows for the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardInfo {
    pub id: &'static str,
    pub driver: &'static str,
    pub name: &'static str,
    pub longname: &'static str,
    pub mixername: &'static str,
}

const CARD_INFO: CardInfo = CardInfo {
    id: "Swivel",
    driver: "Swivel",
    name: "Swivel Switch",
    longname: "Swivel Playback Control",
    mixername: "Swivel Mixer",
};

/// The control surface itself.
///
/// Volumes live as written; mute is stored inverted so that switch reads
/// report "on" for an unmuted channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtlCard {
    slave_ctl: String,
    volume: [i64; CHANNELS],
    mute: [bool; CHANNELS],
}

impl CtlCard {
    /// Open a card for the configured slave control.
    pub fn open(config: &CtlConfig) -> Self {
        let mut card = Self {
            slave_ctl: config.slave_ctl().to_owned(),
            volume: [0; CHANNELS],
            mute: [false; CHANNELS],
        };
        card.reset();
        card
    }

    /// Restore every element to its default: full volume, unmuted.
    pub fn reset(&mut self) {
        self.volume = [DEFAULT_VOLUME; CHANNELS];
        self.mute = [false; CHANNELS];
    }

    pub fn info(&self) -> CardInfo {
        CARD_INFO
    }

    /// Name of the downstream control device this card fronts.
    pub fn slave_ctl(&self) -> &str {
        &self.slave_ctl
    }

    pub fn elem_count(&self) -> usize {
        ELEMS.len()
    }

    /// Element at `index` in list order.
    pub fn elem_list(&self, index: usize) -> Result<ElemKey> {
        ELEMS
            .get(index)
            .copied()
            .ok_or(CtlError::IndexOutOfRange {
                index,
                count: ELEMS.len(),
            })
    }

    /// Look an element up by its exported name.
    pub fn find_elem(&self, name: &str) -> Result<ElemKey> {
        ELEMS
            .iter()
            .copied()
            .find(|elem| elem.name() == name)
            .ok_or_else(|| CtlError::UnknownElement(name.to_owned()))
    }

    pub fn attribute(&self, key: ElemKey) -> ElemAttr {
        ElemAttr {
            elem_type: key.elem_type(),
            channels: CHANNELS,
        }
    }

    /// Value bounds, defined for integer elements only.
    pub fn integer_range(&self, key: ElemKey) -> Result<IntRange> {
        if key.is_volume() {
            Ok(VOLUME_RANGE)
        } else {
            Err(CtlError::NoIntegerRange { elem: key.name() })
        }
    }

    /// Read both channels of an element. Switches read as 0/1.
    pub fn read(&self, key: ElemKey) -> [i64; CHANNELS] {
        if key.is_volume() {
            self.volume
        } else {
            [i64::from(!self.mute[0]), i64::from(!self.mute[1])]
        }
    }

    /// Write both channels of an element.
    ///
    /// Volume values must sit inside the advertised range; a rejected write
    /// leaves the element untouched. Switch writes treat any non-zero value
    /// as "on".
    pub fn write(&mut self, key: ElemKey, values: [i64; CHANNELS]) -> Result<()> {
        if key.is_volume() {
            for value in values {
                if value < VOLUME_RANGE.min || value > VOLUME_RANGE.max {
                    return Err(CtlError::ValueOutOfRange {
                        elem: key.name(),
                        value,
                        min: VOLUME_RANGE.min,
                        max: VOLUME_RANGE.max,
                    });
                }
            }
            self.volume = values;
        } else {
            self.mute = [values[0] == 0, values[1] == 0];
        }
        Ok(())
    }
}

impl Default for CtlCard {
    fn default() -> Self {
        Self::open(&CtlConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_opens_at_full_volume_unmuted() {
        let card = CtlCard::default();
        assert_eq!(card.read(ElemKey::MasterVolume), [100, 100]);
        assert_eq!(card.read(ElemKey::PcmVolume), [100, 100]);
        assert_eq!(card.read(ElemKey::MasterSwitch), [1, 1]);
        assert_eq!(card.read(ElemKey::PcmSwitch), [1, 1]);
        assert_eq!(card.slave_ctl(), "default");
    }

    #[test]
    fn test_elements_enumerate_in_list_order() {
        let card = CtlCard::default();
        assert_eq!(card.elem_count(), 4);
        assert_eq!(card.elem_list(0).unwrap(), ElemKey::MasterVolume);
        assert_eq!(card.elem_list(3).unwrap(), ElemKey::PcmSwitch);
        assert_eq!(
            card.elem_list(4),
            Err(CtlError::IndexOutOfRange { index: 4, count: 4 })
        );
    }

    #[test]
    fn test_find_elem_matches_exported_names() {
        let card = CtlCard::default();
        for index in 0..card.elem_count() {
            let elem = card.elem_list(index).unwrap();
            assert_eq!(card.find_elem(elem.name()).unwrap(), elem);
        }
        assert_eq!(
            card.find_elem("Capture Volume"),
            Err(CtlError::UnknownElement("Capture Volume".to_owned()))
        );
    }

    #[test]
    fn test_attributes_report_type_and_channel_count() {
        let card = CtlCard::default();
        let volume = card.attribute(ElemKey::PcmVolume);
        assert_eq!(volume.elem_type, ElemType::Integer);
        assert_eq!(volume.channels, 2);

        let switch = card.attribute(ElemKey::MasterSwitch);
        assert_eq!(switch.elem_type, ElemType::Boolean);
        assert_eq!(switch.channels, 2);
    }

    #[test]
    fn test_integer_range_only_exists_for_volumes() {
        let card = CtlCard::default();
        assert_eq!(
            card.integer_range(ElemKey::MasterVolume).unwrap(),
            IntRange {
                min: 0,
                max: 100,
                step: 1
            }
        );
        assert_eq!(
            card.integer_range(ElemKey::MasterSwitch),
            Err(CtlError::NoIntegerRange {
                elem: "Master Playback Switch"
            })
        );
    }

    #[test]
    fn test_master_and_pcm_share_the_stream_state() {
        let mut card = CtlCard::default();
        card.write(ElemKey::MasterVolume, [30, 40]).unwrap();
        assert_eq!(card.read(ElemKey::PcmVolume), [30, 40]);

        card.write(ElemKey::PcmSwitch, [0, 1]).unwrap();
        assert_eq!(card.read(ElemKey::MasterSwitch), [0, 1]);
    }

    #[test]
    fn test_switch_writes_use_truthiness() {
        let mut card = CtlCard::default();
        card.write(ElemKey::MasterSwitch, [5, 0]).unwrap();
        assert_eq!(card.read(ElemKey::MasterSwitch), [1, 0]);
    }

    #[test]
    fn test_out_of_range_volume_is_rejected_untouched() {
        let mut card = CtlCard::default();
        card.write(ElemKey::PcmVolume, [20, 20]).unwrap();

        let err = card.write(ElemKey::PcmVolume, [50, 101]).unwrap_err();
        assert_eq!(
            err,
            CtlError::ValueOutOfRange {
                elem: "PCM Playback Volume",
                value: 101,
                min: 0,
                max: 100,
            }
        );
        assert_eq!(card.read(ElemKey::PcmVolume), [20, 20]);

        assert!(card.write(ElemKey::PcmVolume, [-1, 0]).is_err());
        assert_eq!(card.read(ElemKey::PcmVolume), [20, 20]);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut card = CtlCard::default();
        card.write(ElemKey::MasterVolume, [5, 5]).unwrap();
        card.write(ElemKey::MasterSwitch, [0, 0]).unwrap();

        card.reset();
        assert_eq!(card.read(ElemKey::MasterVolume), [100, 100]);
        assert_eq!(card.read(ElemKey::MasterSwitch), [1, 1]);
    }

    #[test]
    fn test_config_resolves_slave_ctl_name() {
        let config =
            CtlConfig::from_pairs([("slavectl", ConfigValue::Str("hw:1"))]).unwrap();
        assert_eq!(config.slave_ctl(), "hw:1");

        let config = CtlConfig::from_pairs([]).unwrap();
        assert_eq!(config.slave_ctl(), "default");

        let config =
            CtlConfig::from_pairs([("slavectl", ConfigValue::Str(""))]).unwrap();
        assert_eq!(config.slave_ctl(), "default");
    }

    #[test]
    fn test_config_rejects_unknown_and_mistyped_keys() {
        let err = CtlConfig::from_pairs([
            ("comment", ConfigValue::Str("panel card")),
            ("slavecontrol", ConfigValue::Str("hw:1")),
        ])
        .unwrap_err();
        assert_eq!(err, CtlError::UnknownConfigKey("slavecontrol".to_owned()));

        let err = CtlConfig::from_pairs([("slavectl", ConfigValue::Int(1))]).unwrap_err();
        assert_eq!(
            err,
            CtlError::InvalidConfigValue {
                field: "slavectl",
                expected: "a string",
            }
        );
    }

    #[test]
    fn test_card_identity_strings() {
        let info = CtlCard::default().info();
        assert_eq!(info.id, "Swivel");
        assert_eq!(info.mixername, "Swivel Mixer");
    }
}
