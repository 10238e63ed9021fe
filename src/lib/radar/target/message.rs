use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::arpa::ArpaTarget;
use super::{ExtendedPosition, TargetStatus};

/// Seconds after the fix that a reported target goes stale
pub const LIFE_TIME_SEC: i64 = 3;

/// Target status as shown to the navigation system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportedStatus {
    /// Query, target under acquisition
    Q,
    /// Tracked
    T,
    /// Lost
    L,
}

///
/// The record handed to the TTM/CoT/JSON encoders, one per reported target per sweep.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetMessage {
    pub uid: usize,
    pub mmsi: u32,
    pub source_id: usize,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub sog: f64, // knots
    pub cog: f64, // degrees true
    pub time: DateTime<Utc>,
    pub stale: DateTime<Utc>,
    pub state: ReportedStatus,
    pub lost_count: u32,
    pub automatic: bool,
}

impl TargetMessage {
    pub(super) fn new(target: &ArpaTarget, source_id: usize, state: ReportedStatus) -> Self {
        let time = DateTime::from_timestamp_millis(target.position().time as i64).unwrap_or_default();
        let name = if target.is_automatic() {
            format!("ARPA{}", target.id())
        } else {
            format!("MARPA{}", target.id())
        };
        TargetMessage {
            uid: target.id(),
            mmsi: (target.id() % 1000000) as u32,
            source_id,
            name,
            lat: target.position().pos.lat,
            lon: target.position().pos.lon,
            sog: target.position().speed_kn,
            cog: target.course(),
            time,
            stale: time + TimeDelta::seconds(LIFE_TIME_SEC),
            state,
            lost_count: target.lost_count(),
            automatic: target.is_automatic(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

///
/// Target state exchanged with the other radar on board, or with other vessels.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicTargetData {
    pub target_id: usize,
    pub p: [[f64; 4]; 4],
    pub position: ExtendedPosition,
    pub status: TargetStatus,
    pub age_rotations: u32,
}

impl DynamicTargetData {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSource {
    /// The other radar on this vessel
    OtherRadar,
    /// A radar on another vessel
    OtherVessel,
}

#[derive(Debug, Clone)]
pub struct IncomingTarget {
    pub data: DynamicTargetData,
    pub source: TargetSource,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radar::target::tests::{arpa, own_ship, sweep};
    use crate::radar::history::HistoryPixel;
    use crate::radar::target::kalman::Polar;
    use crate::radar::target::Doppler;
    use crate::radar::GeoPosition;

    fn tracked_target() -> ArpaTarget {
        let mut arpa = arpa(3);
        let blob = (300, 400);
        sweep(&mut arpa, 0, &[blob], HistoryPixel::INITIAL);
        let id = arpa
            .acquire_new_arpa_target(Polar::new(blob.0 - 3, blob.1, 0), Doppler::Any)
            .unwrap();
        for rotation in 0..6 {
            if rotation > 0 {
                sweep(&mut arpa, rotation, &[blob], HistoryPixel::INITIAL);
            }
            arpa.refresh_all_arpa_targets(&own_ship());
        }
        arpa.target(id).unwrap().clone()
    }

    #[test]
    fn message_fields() {
        let target = tracked_target();
        let message = target.message(3).unwrap();
        assert_eq!(message.uid, 300001);
        assert_eq!(message.mmsi, 300001);
        assert_eq!(message.source_id, 3);
        assert_eq!(message.name, "ARPA300001");
        assert_eq!(message.state, ReportedStatus::T);
        assert_eq!(message.time.timestamp_millis() as u64, target.position().time);
        assert_eq!((message.stale - message.time).num_seconds(), LIFE_TIME_SEC);

        let json = message.to_json().unwrap();
        assert!(json.contains("\"state\":\"T\""));
        assert!(json.contains("\"sourceId\":3"));
        let back: TargetMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn dynamic_data_over_the_wire() {
        let target = tracked_target();
        let data = target.dynamic_data();
        assert_eq!(data.status, TargetStatus::Active);
        assert_eq!(data.age_rotations, 6);
        assert!(data.p[0][0] > 0.);

        let bytes = data.to_bytes().unwrap();
        assert_eq!(DynamicTargetData::from_bytes(&bytes).unwrap(), data);
        assert!(DynamicTargetData::from_bytes(&bytes[..10]).is_err());
    }

    #[test]
    fn unreported_targets_have_no_message() {
        let mut arpa = arpa(1);
        sweep(&mut arpa, 0, &[], HistoryPixel::empty());
        let id = arpa
            .acquire_new_arpa_target(Polar::new(300, 400, 0), Doppler::Any)
            .unwrap();
        assert!(arpa.target(id).unwrap().message(1).is_none());
        assert_ne!(arpa.target(id).unwrap().position().pos, GeoPosition::default());
    }
}
