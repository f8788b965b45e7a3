//! Mapping of OMCI alarm bits to ONU alarm kinds and interfaces.

use omci_core::class_ids::{ANI_G, CIRCUIT_PACK, ONT_G, PPTP_ETHERNET_UNI};
use parking_lot::RwLock;
use serde::Serialize;

/// Highest alarm number reserved by the standard; numbers above it are vendor specific.
const LAST_RESERVED_ALARM: usize = 207;

/// Logical ONU alarm raised for an OMCI alarm bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnuAlarmKind {
    /// Equipment failure.
    Equipment,
    /// Self test failed.
    SelfTestFailure,
    /// Laser end of life.
    LaserEndOfLife,
    /// Temperature warning.
    TemperatureYellow,
    /// Temperature critical.
    TemperatureRed,
    /// Supply voltage warning.
    VoltageYellow,
    /// Supply voltage critical.
    VoltageRed,
    /// Power lost.
    DyingGasp,
    /// Ethernet UNI loss of signal.
    EthernetUniLos,
    /// Received optical power too low.
    LowRxOptical,
    /// Received optical power too high.
    HighRxOptical,
    /// Transmit optical power too low.
    LowTxOptical,
    /// Transmit optical power too high.
    HighTxOptical,
    /// Laser bias current out of range.
    LaserBiasCurrent,
}

impl OnuAlarmKind {
    /// Maps an alarm bit of a class to its alarm kind.
    pub fn from_omci(class_id: u16, alarm_number: usize) -> Option<Self> {
        use OnuAlarmKind::*;
        let kind = match (class_id, alarm_number) {
            (CIRCUIT_PACK, 0) => Equipment,
            (CIRCUIT_PACK, 2) => SelfTestFailure,
            (CIRCUIT_PACK, 3) => LaserEndOfLife,
            (CIRCUIT_PACK, 4) => TemperatureYellow,
            (CIRCUIT_PACK, 5) => TemperatureRed,

            (PPTP_ETHERNET_UNI, 0) => EthernetUniLos,

            (ONT_G, 0) => Equipment,
            (ONT_G, 6) => SelfTestFailure,
            (ONT_G, 7) => DyingGasp,
            (ONT_G, 8) => TemperatureYellow,
            (ONT_G, 9) => TemperatureRed,
            (ONT_G, 10) => VoltageYellow,
            (ONT_G, 11) => VoltageRed,

            (ANI_G, 0) => LowRxOptical,
            (ANI_G, 1) => HighRxOptical,
            (ANI_G, 4) => LowTxOptical,
            (ANI_G, 5) => HighTxOptical,
            (ANI_G, 6) => LaserBiasCurrent,
            _ => return None,
        };
        Some(kind)
    }

    /// Human readable name.
    pub const fn description(self) -> &'static str {
        match self {
            OnuAlarmKind::Equipment => "Equipment alarm",
            OnuAlarmKind::SelfTestFailure => "Self-test failure",
            OnuAlarmKind::LaserEndOfLife => "Laser end of life",
            OnuAlarmKind::TemperatureYellow => "Temperature yellow",
            OnuAlarmKind::TemperatureRed => "Temperature red",
            OnuAlarmKind::VoltageYellow => "Voltage yellow",
            OnuAlarmKind::VoltageRed => "Voltage red",
            OnuAlarmKind::DyingGasp => "Dying gasp",
            OnuAlarmKind::EthernetUniLos => "Ethernet UNI loss of signal",
            OnuAlarmKind::LowRxOptical => "Low received optical power",
            OnuAlarmKind::HighRxOptical => "High received optical power",
            OnuAlarmKind::LowTxOptical => "Low transmit optical power",
            OnuAlarmKind::HighTxOptical => "High transmit optical power",
            OnuAlarmKind::LaserBiasCurrent => "Laser bias current",
        }
    }
}

/// Describes alarm `alarm_number` of `class_id`.
pub fn describe_alarm(class_id: u16, alarm_number: usize) -> String {
    match OnuAlarmKind::from_omci(class_id, alarm_number) {
        Some(kind) => kind.description().to_string(),
        None if alarm_number <= LAST_RESERVED_ALARM => format!("Reserved alarm {alarm_number}"),
        None => format!("Vendor specific alarm {alarm_number}"),
    }
}

/// A port the adapter registered for alarm interface resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRegistration {
    /// ME instance id backing the port.
    pub entity_id: u16,
    /// Logical or physical port number reported with alarms.
    pub port_number: u32,
}

/// UNI and ANI ports of one device.
#[derive(Debug, Default)]
pub struct PortRegistry {
    uni: RwLock<Vec<PortRegistration>>,
    ani: RwLock<Vec<PortRegistration>>,
}

impl PortRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a UNI port, replacing one with the same entity id.
    pub fn register_uni(&self, entity_id: u16, port_number: u32) {
        let mut uni = self.uni.write();
        uni.retain(|p| p.entity_id != entity_id);
        uni.push(PortRegistration {
            entity_id,
            port_number,
        });
    }

    /// Registers an ANI port.
    pub fn register_ani(&self, entity_id: u16, port_number: u32) {
        let mut ani = self.ani.write();
        ani.retain(|p| p.entity_id != entity_id);
        ani.push(PortRegistration {
            entity_id,
            port_number,
        });
    }

    /// Removes all ports.
    pub fn clear(&self) {
        self.uni.write().clear();
        self.ani.write().clear();
    }

    /// Resolves the interface an alarm of `class_id`/`entity_id` belongs to.
    ///
    /// UNI-side classes match a UNI port by entity id; ANI-side classes
    /// take the first ANI port.
    pub fn interface_for(&self, class_id: u16, entity_id: u16) -> Option<u32> {
        match class_id {
            CIRCUIT_PACK | PPTP_ETHERNET_UNI => self
                .uni
                .read()
                .iter()
                .find(|p| p.entity_id == entity_id)
                .map(|p| p.port_number),
            ANI_G | ONT_G => self.ani.read().first().map(|p| p.port_number),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_table() {
        assert_eq!(OnuAlarmKind::from_omci(ONT_G, 7), Some(OnuAlarmKind::DyingGasp));
        assert_eq!(OnuAlarmKind::from_omci(ANI_G, 6), Some(OnuAlarmKind::LaserBiasCurrent));
        assert_eq!(OnuAlarmKind::from_omci(CIRCUIT_PACK, 1), None);
        assert_eq!(OnuAlarmKind::from_omci(ANI_G, 2), None);
        assert_eq!(OnuAlarmKind::from_omci(2, 0), None);
    }

    #[test]
    fn descriptions() {
        assert_eq!(describe_alarm(PPTP_ETHERNET_UNI, 0), "Ethernet UNI loss of signal");
        assert_eq!(describe_alarm(PPTP_ETHERNET_UNI, 207), "Reserved alarm 207");
        assert_eq!(describe_alarm(PPTP_ETHERNET_UNI, 208), "Vendor specific alarm 208");
    }

    #[test]
    fn interface_resolution() {
        let ports = PortRegistry::new();
        assert_eq!(ports.interface_for(ANI_G, 1), None);

        ports.register_uni(257, 16);
        ports.register_uni(258, 17);
        ports.register_ani(1, 1024);
        ports.register_ani(2, 2048);

        assert_eq!(ports.interface_for(PPTP_ETHERNET_UNI, 258), Some(17));
        assert_eq!(ports.interface_for(CIRCUIT_PACK, 999), None);
        assert_eq!(ports.interface_for(ONT_G, 0), Some(1024));
        assert_eq!(ports.interface_for(ANI_G, 2), Some(1024));
        assert_eq!(ports.interface_for(7, 0), None);

        ports.register_uni(258, 18);
        assert_eq!(ports.interface_for(PPTP_ETHERNET_UNI, 258), Some(18));
        ports.clear();
        assert_eq!(ports.interface_for(PPTP_ETHERNET_UNI, 257), None);
    }
}
