//! Protocol variants and their command sets.
//!
//! The standard and low-power firmwares share framing and datapoint encoding
//! but number their commands differently and answer different requests. Each
//! variant is described by a static [`Profile`] that the session consults
//! instead of branching on the variant everywhere.
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProtocolVariant {
    #[default]
    #[serde(rename = "normal", alias = "standard")]
    Standard,
    #[serde(rename = "low_power")]
    LowPower,
}

impl ProtocolVariant {
    pub fn profile(self) -> &'static Profile {
        match self {
            Self::Standard => &STANDARD,
            Self::LowPower => &LOW_POWER,
        }
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Standard => "normal",
            Self::LowPower => "low_power",
        })
    }
}

macro_rules! command_set {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal => $label:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value,)+
        }

        impl $name {
            pub const fn id(self) -> u8 {
                self as u8
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl TryFrom<u8> for $name {
            type Error = u8;

            fn try_from(raw: u8) -> Result<Self, Self::Error> {
                match raw {
                    $($value => Ok(Self::$variant),)+
                    other => Err(other),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} (0x{:02X})", self.name(), self.id())
            }
        }
    };
}

command_set! {
    /// Command ids of the standard (mains powered) firmware.
    StandardCommand {
        Heartbeat = 0x00 => "HEARTBEAT",
        ProductQuery = 0x01 => "PRODUCT_QUERY",
        ConfQuery = 0x02 => "CONF_QUERY",
        WifiState = 0x03 => "WIFI_STATE",
        WifiReset = 0x04 => "WIFI_RESET",
        WifiSelect = 0x05 => "WIFI_SELECT",
        DatapointDeliver = 0x06 => "DATAPOINT_DELIVER",
        DatapointReport = 0x07 => "DATAPOINT_REPORT",
        DatapointQuery = 0x08 => "DATAPOINT_QUERY",
        WifiTest = 0x0E => "WIFI_TEST",
        LocalTimeQuery = 0x1C => "LOCAL_TIME_QUERY",
    }
}

command_set! {
    /// Command ids of the battery powered (low-power) firmware.
    LowPowerCommand {
        ProductQuery = 0x01 => "PRODUCT_QUERY",
        WifiState = 0x02 => "WIFI_STATE",
        WifiReset = 0x03 => "WIFI_RESET",
        WifiSelect = 0x04 => "WIFI_SELECT",
        DatapointReport = 0x05 => "DATAPOINT_REPORT",
        LocalTimeQuery = 0x06 => "LOCAL_TIME_QUERY",
        WifiTest = 0x07 => "WIFI_TEST",
        DatapointReportStored = 0x08 => "DATAPOINT_REPORT_STORED",
        ModuleCommand = 0x09 => "MODULE_COMMAND",
        FirmwareUpgrade = 0x0A => "FIRMWARE_UPGRADE",
        SignalStrengthQuery = 0x0B => "SIGNAL_STRENGTH_QUERY",
        ObtainDpCache = 0x10 => "OBTAIN_DP_CACHE",
    }
}

/// When connectivity reports are put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReporting {
    /// Only when the code differs from the last one sent; cloud status needs protocol v3+
    OnChange,
    /// On every trigger, cloud status regardless of protocol version
    Always,
}

/// Capability record of one protocol variant.
#[derive(Debug)]
pub struct Profile {
    pub variant: ProtocolVariant,
    pub product_query: u8,
    pub wifi_state: u8,
    pub datapoint_report: u8,
    pub local_time_query: u8,
    pub wifi_test: u8,
    pub heartbeat: Option<u8>,
    pub datapoint_deliver: Option<u8>,
    pub has_handshake: bool,
    pub status_reporting: StatusReporting,
    replies: &'static [(u8, u8)],
    acknowledgements: &'static [(u8, &'static [u8])],
}

impl Profile {
    /// Reply command awaited after sending `command`, if any.
    pub fn expected_reply(&self, command: u8) -> Option<u8> {
        self.replies
            .iter()
            .find(|(sent, _)| *sent == command)
            .map(|(_, reply)| *reply)
    }

    /// Fixed payload answering an inbound `command`, if the variant acknowledges it.
    pub fn acknowledgement(&self, command: u8) -> Option<&'static [u8]> {
        self.acknowledgements
            .iter()
            .find(|(cmd, _)| *cmd == command)
            .map(|(_, payload)| *payload)
    }

    /// Human readable command name for logs.
    pub fn command_name(&self, command: u8) -> Option<&'static str> {
        match self.variant {
            ProtocolVariant::Standard => StandardCommand::try_from(command).ok().map(StandardCommand::name),
            ProtocolVariant::LowPower => LowPowerCommand::try_from(command).ok().map(LowPowerCommand::name),
        }
    }
}

pub static STANDARD: Profile = Profile {
    variant: ProtocolVariant::Standard,
    product_query: StandardCommand::ProductQuery.id(),
    wifi_state: StandardCommand::WifiState.id(),
    datapoint_report: StandardCommand::DatapointReport.id(),
    local_time_query: StandardCommand::LocalTimeQuery.id(),
    wifi_test: StandardCommand::WifiTest.id(),
    heartbeat: Some(StandardCommand::Heartbeat.id()),
    datapoint_deliver: Some(StandardCommand::DatapointDeliver.id()),
    has_handshake: true,
    status_reporting: StatusReporting::OnChange,
    replies: &[
        (StandardCommand::Heartbeat.id(), StandardCommand::Heartbeat.id()),
        (StandardCommand::ProductQuery.id(), StandardCommand::ProductQuery.id()),
        (StandardCommand::ConfQuery.id(), StandardCommand::ConfQuery.id()),
        (StandardCommand::DatapointDeliver.id(), StandardCommand::DatapointReport.id()),
        (StandardCommand::DatapointQuery.id(), StandardCommand::DatapointReport.id()),
    ],
    acknowledgements: &[(StandardCommand::WifiTest.id(), &[0x00, 0x00])],
};

pub static LOW_POWER: Profile = Profile {
    variant: ProtocolVariant::LowPower,
    product_query: LowPowerCommand::ProductQuery.id(),
    wifi_state: LowPowerCommand::WifiState.id(),
    datapoint_report: LowPowerCommand::DatapointReport.id(),
    local_time_query: LowPowerCommand::LocalTimeQuery.id(),
    wifi_test: LowPowerCommand::WifiTest.id(),
    heartbeat: None,
    datapoint_deliver: None,
    has_handshake: false,
    status_reporting: StatusReporting::Always,
    replies: &[(LowPowerCommand::ProductQuery.id(), LowPowerCommand::ProductQuery.id())],
    acknowledgements: &[
        (LowPowerCommand::WifiReset.id(), &[]),
        (LowPowerCommand::WifiSelect.id(), &[]),
        (LowPowerCommand::WifiTest.id(), &[0x00, 0x00]),
        (LowPowerCommand::ObtainDpCache.id(), &[0x00]),
        (LowPowerCommand::FirmwareUpgrade.id(), &[0x00]),
        (LowPowerCommand::SignalStrengthQuery.id(), &[0x01, 100]),
    ],
};

pub const STATUS_DISCONNECTED: u8 = 0x02;
pub const STATUS_LOCAL: u8 = 0x03;
pub const STATUS_CLOUD: u8 = 0x04;

/// Connectivity status code for the current network state.
///
/// Cloud status (0x04) implies a local connection. Under
/// [`StatusReporting::OnChange`] it also requires a protocol version of 3 or
/// newer; an unknown version counts as older.
pub fn connectivity_status(
    local: bool,
    remote: bool,
    protocol_version: Option<u8>,
    policy: StatusReporting,
) -> u8 {
    if !local {
        return STATUS_DISCONNECTED;
    }
    let cloud_allowed = match policy {
        StatusReporting::Always => true,
        StatusReporting::OnChange => protocol_version.is_some_and(|v| v >= 0x03),
    };
    if remote && cloud_allowed {
        STATUS_CLOUD
    } else {
        STATUS_LOCAL
    }
}
