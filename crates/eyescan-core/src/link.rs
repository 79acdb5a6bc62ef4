//! Link identity and the board topologies that produce link lists.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One physical SerDes lane: a TX endpoint wired to an RX endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Index within the run; also drives the start-up stagger.
    pub id: usize,
    /// Transceiver quad of the receiver, e.g. `Quad_204`.
    pub group: String,
    /// Channel within the quad.
    pub channel: usize,
    /// Receiver endpoint path.
    pub rx: String,
    /// Transmitter endpoint path.
    pub tx: String,
}

impl Link {
    pub fn new(id: usize, tx: Lane, rx: Lane) -> Self {
        Self {
            id,
            group: rx.group(),
            channel: rx.channel,
            rx: rx.endpoint("RX"),
            tx: tx.endpoint("TX"),
        }
    }

    /// Display and log name, e.g. `YK-Quad_204_CH2`.
    pub fn name(&self) -> String {
        format!("YK-{}_CH{}", self.group, self.channel)
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (TX={} RX={})", self.name(), self.tx, self.rx)
    }
}

/// A transceiver lane address: quad number and channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lane {
    pub quad: u16,
    pub channel: usize,
}

impl Lane {
    pub const fn new(quad: u16, channel: usize) -> Self {
        Self { quad, channel }
    }

    pub fn group(&self) -> String {
        format!("Quad_{}", self.quad)
    }

    fn endpoint(&self, side: &str) -> String {
        format!("IBERT_0.Quad_{}.CH_{}.{side}", self.quad, self.channel)
    }
}

// ---------------------------------------------------------------------------
// Connection types
// ---------------------------------------------------------------------------

/// Cable wiring between the QSFP-DD cages of the test boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    /// One cable looped between both cages of the same board, 4 lanes each way.
    SelfLoopedX4,
    SelfLoopedX8,
    /// Two boards cross-connected cage to cage.
    CrossConnectedX4,
    CrossConnectedX8,
}

impl FromStr for ConnectionType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S4" | "SLoop_x4" => Ok(ConnectionType::SelfLoopedX4),
            "S8" | "SLoop_x8" => Ok(ConnectionType::SelfLoopedX8),
            "X4" | "XConn_x4" => Ok(ConnectionType::CrossConnectedX4),
            "X8" | "XConn_x8" => Ok(ConnectionType::CrossConnectedX8),
            other => Err(ConfigError::ConnectionType(other.to_string())),
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionType::SelfLoopedX4 => "SLoop_x4",
            ConnectionType::SelfLoopedX8 => "SLoop_x8",
            ConnectionType::CrossConnectedX4 => "XConn_x4",
            ConnectionType::CrossConnectedX8 => "XConn_x8",
        };
        write!(f, "{s}")
    }
}

const fn l(quad: u16, channel: usize) -> Lane {
    Lane::new(quad, channel)
}

// (TX, RX) pairs for one looped cable.
const SELF_LOOPED_X4: [(Lane, Lane); 8] = [
    (l(202, 0), l(204, 0)),
    (l(202, 1), l(204, 2)),
    (l(202, 2), l(205, 0)),
    (l(202, 3), l(205, 2)),
    (l(204, 0), l(202, 0)),
    (l(205, 0), l(202, 2)),
    (l(204, 1), l(203, 0)),
    (l(205, 1), l(203, 2)),
];

const SELF_LOOPED_X8: [(Lane, Lane); 16] = [
    (l(202, 0), l(204, 0)),
    (l(202, 1), l(204, 2)),
    (l(202, 2), l(205, 0)),
    (l(202, 3), l(205, 2)),
    (l(203, 0), l(204, 1)),
    (l(203, 1), l(204, 3)),
    (l(203, 2), l(205, 1)),
    (l(203, 3), l(205, 3)),
    (l(204, 0), l(202, 0)),
    (l(204, 2), l(202, 1)),
    (l(205, 0), l(202, 2)),
    (l(205, 2), l(202, 3)),
    (l(204, 1), l(203, 0)),
    (l(204, 3), l(203, 1)),
    (l(205, 1), l(203, 2)),
    (l(205, 3), l(203, 3)),
];

// Cross-connected boards use the same lane for TX and RX.
const CROSS_CONNECTED_X4: [Lane; 8] = [
    l(202, 0),
    l(202, 2),
    l(203, 0),
    l(203, 2),
    l(204, 0),
    l(204, 2),
    l(205, 0),
    l(205, 2),
];

const CROSS_CONNECTED_X8: [Lane; 16] = [
    l(202, 0),
    l(202, 1),
    l(202, 2),
    l(202, 3),
    l(203, 0),
    l(203, 1),
    l(203, 2),
    l(203, 3),
    l(204, 0),
    l(204, 2),
    l(205, 0),
    l(205, 2),
    l(204, 1),
    l(204, 3),
    l(205, 1),
    l(205, 3),
];

impl ConnectionType {
    /// The links of this wiring, numbered in scan order.
    pub fn links(self) -> Vec<Link> {
        let pairs: Vec<(Lane, Lane)> = match self {
            ConnectionType::SelfLoopedX4 => SELF_LOOPED_X4.to_vec(),
            ConnectionType::SelfLoopedX8 => SELF_LOOPED_X8.to_vec(),
            ConnectionType::CrossConnectedX4 => {
                CROSS_CONNECTED_X4.iter().map(|&lane| (lane, lane)).collect()
            }
            ConnectionType::CrossConnectedX8 => {
                CROSS_CONNECTED_X8.iter().map(|&lane| (lane, lane)).collect()
            }
        };
        pairs
            .into_iter()
            .enumerate()
            .map(|(id, (tx, rx))| Link::new(id, tx, rx))
            .collect()
    }
}

/// Links for the simulator: four channels per virtual quad `Quad_90<n>`.
pub fn simulated_links(count: usize) -> Vec<Link> {
    (0..count)
        .map(|id| {
            let lane = Lane::new(900 + (id / 4) as u16, id % 4);
            Link::new(id, lane, lane)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connection_type_aliases() {
        assert_eq!(
            "S4".parse::<ConnectionType>().unwrap(),
            ConnectionType::SelfLoopedX4
        );
        assert_eq!(
            "XConn_x8".parse::<ConnectionType>().unwrap(),
            ConnectionType::CrossConnectedX8
        );
        assert!(matches!(
            "Loop".parse::<ConnectionType>(),
            Err(ConfigError::ConnectionType(_))
        ));
    }

    #[test]
    fn test_link_counts() {
        assert_eq!(ConnectionType::SelfLoopedX4.links().len(), 8);
        assert_eq!(ConnectionType::SelfLoopedX8.links().len(), 16);
        assert_eq!(ConnectionType::CrossConnectedX4.links().len(), 8);
        assert_eq!(ConnectionType::CrossConnectedX8.links().len(), 16);
    }

    #[test]
    fn test_self_looped_link_naming() {
        let links = ConnectionType::SelfLoopedX4.links();
        let second = &links[1];
        assert_eq!(second.id, 1);
        assert_eq!(second.tx, "IBERT_0.Quad_202.CH_1.TX");
        assert_eq!(second.rx, "IBERT_0.Quad_204.CH_2.RX");
        assert_eq!(second.name(), "YK-Quad_204_CH2");
    }

    #[test]
    fn test_simulated_links() {
        let links = simulated_links(6);
        assert_eq!(links[0].name(), "YK-Quad_900_CH0");
        assert_eq!(links[5].group, "Quad_901");
        assert_eq!(links[5].channel, 1);
        assert!(links.iter().enumerate().all(|(i, l)| l.id == i));
    }

    #[test]
    fn test_link_ids_are_unique() {
        let links = ConnectionType::CrossConnectedX8.links();
        let mut names: Vec<String> = links.iter().map(Link::name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 16);
    }
}
