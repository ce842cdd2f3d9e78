//! Value serializers for tree keys and payloads
//!
//! All integers are big-endian; the byte order is fixed across the whole
//! package so trees written on one node can be read on any other.

use crate::model::{DistanceList, PointId};
use crate::{ProcessError, Result};

/// Encode/decode contract for values stored in a result tree
pub trait ValueSerializer<T> {
    fn encode(&self, value: &T) -> Vec<u8>;

    fn decode(&self, bytes: &[u8]) -> Result<T>;

    /// Encoded size for fixed-width types, `None` for variable
    fn fixed_size(&self) -> Option<usize>;
}

/// Constant 4-byte big-endian point id serializer
#[derive(Debug, Clone, Copy, Default)]
pub struct PointIdSerializer;

impl ValueSerializer<PointId> for PointIdSerializer {
    fn encode(&self, value: &PointId) -> Vec<u8> {
        value.to_be_bytes().to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Result<PointId> {
        let raw: [u8; 4] = bytes
            .try_into()
            .map_err(|_| ProcessError::CorruptTree(format!("bad key length: {}", bytes.len())))?;
        Ok(PointId::from_be_bytes(raw))
    }

    fn fixed_size(&self) -> Option<usize> {
        Some(4)
    }
}

/// Length-prefixed distance list serializer
///
/// Layout: owner id (4B) | entry count (4B) | count x (neighbor id 4B,
/// distance 8B IEEE-754 bits). The list capacity `k` is runtime
/// configuration, not part of the encoding, so the serializer carries it.
#[derive(Debug, Clone, Copy)]
pub struct DistanceListSerializer {
    k: usize,
}

impl DistanceListSerializer {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

impl ValueSerializer<DistanceList> for DistanceListSerializer {
    fn encode(&self, value: &DistanceList) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + value.len() * 12);
        bytes.extend_from_slice(&value.owner().to_be_bytes());
        bytes.extend_from_slice(&(value.len() as u32).to_be_bytes());
        for &(neighbor, distance) in value.iter() {
            bytes.extend_from_slice(&neighbor.to_be_bytes());
            bytes.extend_from_slice(&distance.to_bits().to_be_bytes());
        }
        bytes
    }

    fn decode(&self, bytes: &[u8]) -> Result<DistanceList> {
        if bytes.len() < 8 {
            return Err(ProcessError::CorruptTree(format!(
                "distance list payload too short: {} bytes",
                bytes.len()
            )));
        }
        let owner = PointId::from_be_bytes(bytes[0..4].try_into().expect("4-byte slice"));
        let count = u32::from_be_bytes(bytes[4..8].try_into().expect("4-byte slice")) as usize;

        if bytes.len() != 8 + count * 12 {
            return Err(ProcessError::CorruptTree(format!(
                "distance list payload length {} does not match count {}",
                bytes.len(),
                count
            )));
        }

        let mut list = DistanceList::new(owner, self.k);
        for i in 0..count {
            let base = 8 + i * 12;
            let neighbor =
                PointId::from_be_bytes(bytes[base..base + 4].try_into().expect("4-byte slice"));
            let bits =
                u64::from_be_bytes(bytes[base + 4..base + 12].try_into().expect("8-byte slice"));
            list.add_distance(neighbor, f64::from_bits(bits));
        }
        Ok(list)
    }

    fn fixed_size(&self) -> Option<usize> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_round_trip() {
        let codec = PointIdSerializer;
        for id in [0u32, 1, 0xDEAD_BEEF, u32::MAX] {
            let bytes = codec.encode(&id);
            assert_eq!(bytes.len(), codec.fixed_size().unwrap());
            assert_eq!(codec.decode(&bytes).unwrap(), id);
        }
    }

    #[test]
    fn test_point_id_rejects_bad_length() {
        let codec = PointIdSerializer;
        assert!(codec.decode(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_distance_list_round_trip() {
        let codec = DistanceListSerializer::new(5);
        let mut list = DistanceList::new(42, 5);
        list.add_distance(7, 1.5);
        list.add_distance(9, 0.25);
        list.add_distance(3, 2.0);

        let bytes = codec.encode(&list);
        assert_eq!(bytes.len(), 8 + 3 * 12);
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn test_empty_distance_list_round_trip() {
        let codec = DistanceListSerializer::new(3);
        let list = DistanceList::new(1, 3);
        let decoded = codec.decode(&codec.encode(&list)).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn test_distance_list_detects_truncation() {
        let codec = DistanceListSerializer::new(5);
        let mut list = DistanceList::new(42, 5);
        list.add_distance(7, 1.5);

        let mut bytes = codec.encode(&list);
        bytes.pop();
        assert!(matches!(
            codec.decode(&bytes),
            Err(ProcessError::CorruptTree(_))
        ));
    }

    #[test]
    fn test_fixed_size_contract() {
        assert_eq!(PointIdSerializer.fixed_size(), Some(4));
        assert_eq!(DistanceListSerializer::new(2).fixed_size(), None);
    }
}
