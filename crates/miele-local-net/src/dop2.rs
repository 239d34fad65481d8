//! DOP2 leaf reads and writes over the encrypted transport.

use crate::transport::Transport;
use miele_local_core::dop2::{parse_records, Dop2Record};
use miele_local_core::error::Result;
use miele_local_core::leaves::{DecodedLeaf, LeafRegistry, SETTING_ATTRIBUTE, SETTING_UNIT};
use serde::Serialize;

/// Address of one DOP2 leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Dop2Coordinate {
    pub unit: u16,
    pub attribute: u16,
    pub idx1: u16,
    pub idx2: u16,
}

impl Dop2Coordinate {
    pub fn new(unit: u16, attribute: u16) -> Self {
        Self { unit, attribute, idx1: 0, idx2: 0 }
    }

    pub fn with_indices(unit: u16, attribute: u16, idx1: u16, idx2: u16) -> Self {
        Self { unit, attribute, idx1, idx2 }
    }
}

impl std::fmt::Display for Dop2Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.idx1 == 0 && self.idx2 == 0 {
            write!(f, "{}/{}", self.unit, self.attribute)
        } else {
            write!(f, "{}/{}/{}/{}", self.unit, self.attribute, self.idx1, self.idx2)
        }
    }
}

/// DOP2 operations against one device route.
///
/// Borrows the transport; sessions hand one out per call.
pub struct Dop2Client<'a> {
    transport: &'a Transport,
    host: &'a str,
    route: &'a str,
}

impl<'a> Dop2Client<'a> {
    pub fn new(transport: &'a Transport, host: &'a str, route: &'a str) -> Self {
        Self { transport, host, route }
    }

    /// Read one leaf: GET with both indices always present in the query
    /// (some firmware revisions require them even when zero).
    pub async fn read_leaf(
        &self,
        coordinate: Dop2Coordinate,
    ) -> Result<(Vec<Dop2Record>, Vec<u8>)> {
        let path = leaf_path(self.route, &coordinate, true);
        let response = self
            .transport
            .request("GET", self.host, &path, None)
            .await?;
        let records = parse_records(&response.body)?;
        Ok((records, response.body))
    }

    /// Write one leaf: PUT the raw attribute payload; the device answers
    /// with an attribute record sequence describing the post-write state.
    pub async fn write_leaf(
        &self,
        unit: u16,
        attribute: u16,
        payload: &[u8],
    ) -> Result<Vec<Dop2Record>> {
        let coordinate = Dop2Coordinate::new(unit, attribute);
        let path = leaf_path(self.route, &coordinate, false);
        let response = self
            .transport
            .request("PUT", self.host, &path, Some(payload))
            .await?;
        parse_records(&response.body)
    }

    /// Read and decode a device setting: the setting-value leaf with the
    /// setting id carried in `idx1`.
    pub async fn read_setting(
        &self,
        registry: &LeafRegistry,
        setting_id: u16,
    ) -> Result<DecodedLeaf> {
        let coordinate =
            Dop2Coordinate::with_indices(SETTING_UNIT, SETTING_ATTRIBUTE, setting_id, 0);
        let (records, _) = self.read_leaf(coordinate).await?;
        registry.decode(SETTING_UNIT, SETTING_ATTRIBUTE, &records)
    }
}

fn leaf_path(route: &str, coordinate: &Dop2Coordinate, with_query: bool) -> String {
    let base = format!(
        "/Devices/{route}/DOP2/{}/{}",
        coordinate.unit, coordinate.attribute
    );
    if with_query {
        format!("{base}?idx1={}&idx2={}", coordinate.idx1, coordinate.idx2)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_display() {
        assert_eq!(Dop2Coordinate::new(2, 105).to_string(), "2/105");
        assert_eq!(
            Dop2Coordinate::with_indices(2, 105, 3, 1).to_string(),
            "2/105/3/1"
        );
    }

    #[test]
    fn test_leaf_paths() {
        let coordinate = Dop2Coordinate::with_indices(2, 105, 7, 0);
        assert_eq!(
            leaf_path("000123456789", &coordinate, true),
            "/Devices/000123456789/DOP2/2/105?idx1=7&idx2=0"
        );
        assert_eq!(
            leaf_path("000123456789", &coordinate, false),
            "/Devices/000123456789/DOP2/2/105"
        );
    }
}
