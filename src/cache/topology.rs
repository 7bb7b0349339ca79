//! Cluster topology discovery and key-slot hashing.

use crate::cache::traits::CacheError;

pub const SLOT_COUNT: usize = 16384;

/// One line of a `CLUSTER NODES` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub id: String,
    pub address: String,
    pub is_primary: bool,
    pub primary_id: Option<String>,
    pub connected: bool,
    pub slots: Vec<(u16, u16)>,
}

impl ClusterNode {
    fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            return None;
        }

        // host:port@cport[,hostname]
        let address = fields[1].split([',', '@']).next()?.to_string();
        if address.starts_with(':') {
            return None;
        }
        let flags: Vec<&str> = fields[2].split(',').collect();
        let is_primary = flags.contains(&"master");
        let is_replica = flags.contains(&"slave") || flags.contains(&"replica");
        let failed = flags.iter().any(|f| *f == "fail" || *f == "noaddr");

        let primary_id = (is_replica && fields[3] != "-").then(|| fields[3].to_string());
        let slots = if is_primary {
            fields[8..].iter().filter_map(|s| parse_slot_range(s)).collect()
        } else {
            Vec::new()
        };

        Some(Self {
            id: fields[0].to_string(),
            address,
            is_primary,
            primary_id,
            connected: fields[7] == "connected" && !failed,
            slots,
        })
    }
}

// Importing/migrating markers such as "[93->-id]" are skipped.
fn parse_slot_range(s: &str) -> Option<(u16, u16)> {
    if s.starts_with('[') {
        return None;
    }
    match s.split_once('-') {
        Some((start, end)) => Some((start.parse().ok()?, end.parse().ok()?)),
        None => {
            let slot = s.parse().ok()?;
            Some((slot, slot))
        }
    }
}

/// Snapshot of a cluster's nodes.
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    nodes: Vec<ClusterNode>,
}

/// Addresses to connect to plus the owner of each slot, as an index into
/// `addresses`.
#[derive(Debug, Clone)]
pub struct SlotRoutes {
    pub addresses: Vec<String>,
    pub slots: Vec<Option<usize>>,
}

impl ClusterTopology {
    pub fn parse(text: &str) -> Result<Self, CacheError> {
        let nodes: Vec<ClusterNode> = text.lines().filter_map(ClusterNode::parse).collect();
        if !nodes.iter().any(|n| n.is_primary) {
            return Err(CacheError::Protocol(
                "cluster topology has no primary".to_string(),
            ));
        }
        Ok(Self { nodes })
    }

    pub fn primaries(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.iter().filter(|n| n.is_primary)
    }

    fn first_replica_of(&self, primary: &ClusterNode) -> Option<&ClusterNode> {
        self.nodes
            .iter()
            .find(|n| n.connected && n.primary_id.as_deref() == Some(primary.id.as_str()))
    }

    /// One route per primary. With `replica_only`, a connected replica of
    /// each primary takes its place when there is one.
    pub fn routes(&self, replica_only: bool) -> SlotRoutes {
        let mut routes = SlotRoutes {
            addresses: Vec::new(),
            slots: vec![None; SLOT_COUNT],
        };

        for primary in self.primaries() {
            let target = if replica_only {
                self.first_replica_of(primary).unwrap_or(primary)
            } else {
                primary
            };
            let idx = routes.addresses.len();
            routes.addresses.push(target.address.clone());
            for &(start, end) in &primary.slots {
                for slot in start..=end.min(SLOT_COUNT as u16 - 1) {
                    routes.slots[slot as usize] = Some(idx);
                }
            }
        }
        routes
    }
}

/// Cluster slot of `key`, honouring `{hashtag}` sections.
pub fn slot_for_key(key: &[u8]) -> u16 {
    let hashed = match key.iter().position(|&b| b == b'{') {
        Some(open) => match key[open + 1..].iter().position(|&b| b == b'}') {
            Some(len) if len > 0 => &key[open + 1..open + 1 + len],
            _ => key,
        },
        None => key,
    };
    crc16(hashed) % SLOT_COUNT as u16
}

// CRC16-XMODEM
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODES: &str = "\
07c37dfeb235213a872192d90877d0cd55635b91 10.0.0.1:6379@16379 myself,master - 0 0 1 connected 0-5460
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 10.0.0.2:6379@16379 master - 0 1426238316232 2 connected 5461-10922
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 10.0.0.3:6379@16379 master - 0 1426238316232 3 connected 10923-16383 [42->-e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca]
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 10.0.0.4:6379@16379 slave 07c37dfeb235213a872192d90877d0cd55635b91 0 1426238316232 1 connected
";

    #[test]
    fn test_crc16_vector() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_hashtag_slots() {
        assert_eq!(slot_for_key(b"{user1000}.following"), slot_for_key(b"{user1000}.followers"));
        assert_eq!(slot_for_key(b"foo{}bar"), crc16(b"foo{}bar") % 16384);
        assert_eq!(slot_for_key(b"foo"), 12182);
    }

    #[test]
    fn test_parse_primaries() {
        let topology = ClusterTopology::parse(NODES).unwrap();
        assert_eq!(topology.primaries().count(), 3);

        let routes = topology.routes(false);
        assert_eq!(
            routes.addresses,
            ["10.0.0.1:6379", "10.0.0.2:6379", "10.0.0.3:6379"]
        );
        assert_eq!(routes.slots[0], Some(0));
        assert_eq!(routes.slots[5461], Some(1));
        assert_eq!(routes.slots[16383], Some(2));
    }

    #[test]
    fn test_replica_only_routes() {
        let topology = ClusterTopology::parse(NODES).unwrap();
        let routes = topology.routes(true);

        assert_eq!(routes.addresses[0], "10.0.0.4:6379");
        assert_eq!(routes.addresses[1], "10.0.0.2:6379");
        assert_eq!(routes.slots[100], Some(0));
    }

    #[test]
    fn test_no_primary_is_error() {
        assert!(ClusterTopology::parse("garbage").is_err());
    }
}
