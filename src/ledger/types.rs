//! Core types persisted by the ledger.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row identifier of a recorded artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId(i64);

impl ArtifactId {
    /// Wrap a raw row id.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw row id.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How an artifact was first observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySource {
    /// Live filesystem event.
    Watch,
    /// Startup catch-up listing.
    Scan,
    /// Handed in by an external API rather than found on disk.
    Api,
}

impl DiscoverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoverySource::Watch => "watch",
            DiscoverySource::Scan => "scan",
            DiscoverySource::Api => "api",
        }
    }
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoverySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "watch" => Ok(DiscoverySource::Watch),
            "scan" => Ok(DiscoverySource::Scan),
            "api" => Ok(DiscoverySource::Api),
            other => Err(format!("unknown discovery source '{other}'")),
        }
    }
}

/// Decoded activity summary. Every field is optional because decoding
/// may fail or only partially succeed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityMetadata {
    pub activity_type: Option<String>,
    pub activity_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub distance_m: Option<f64>,
    pub calories: Option<i64>,
    pub avg_power_w: Option<i64>,
    pub max_power_w: Option<i64>,
    pub norm_power_w: Option<i64>,
    pub avg_hr: Option<i64>,
    pub max_hr: Option<i64>,
    pub avg_cadence: Option<i64>,
    pub avg_speed_mps: Option<f64>,
    pub total_ascent_m: Option<f64>,
    pub device_name: Option<String>,
    pub software_version: Option<String>,
}

impl ActivityMetadata {
    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// An artifact about to be recorded.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub path: PathBuf,
    pub fingerprint: String,
    pub size: u64,
    pub discovered_at: DateTime<Utc>,
    pub source: DiscoverySource,
    pub metadata: ActivityMetadata,
}

impl NewArtifact {
    /// Create an artifact discovered now, without metadata.
    pub fn new(path: PathBuf, fingerprint: String, size: u64, source: DiscoverySource) -> Self {
        Self {
            path,
            fingerprint,
            size,
            discovered_at: Utc::now(),
            source,
            metadata: ActivityMetadata::default(),
        }
    }

    /// Attach decoded metadata.
    pub fn with_metadata(mut self, metadata: ActivityMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The recorded form, once the ledger has assigned an id.
    pub fn into_artifact(self, id: ArtifactId) -> Artifact {
        Artifact {
            id,
            path: self.path,
            fingerprint: self.fingerprint,
            size: self.size,
            discovered_at: self.discovered_at,
            source: self.source,
            metadata: self.metadata,
        }
    }
}

/// A recorded artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub path: PathBuf,
    pub fingerprint: String,
    pub size: u64,
    pub discovered_at: DateTime<Utc>,
    pub source: DiscoverySource,
    pub metadata: ActivityMetadata,
}

impl Artifact {
    /// File name component, for display and remote naming.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Delivery state of one (artifact, destination) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Succeeded,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Succeeded => "succeeded",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "succeeded" => Ok(DeliveryStatus::Succeeded),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status '{other}'")),
        }
    }
}

/// Outcome of sending one artifact to one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: i64,
    pub artifact_id: ArtifactId,
    pub destination: String,
    pub status: DeliveryStatus,
    pub attempted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub remote_id: Option<String>,
    pub remote_locator: Option<String>,
    pub error: Option<String>,
    pub retries: u32,
}

/// Per-destination delivery tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationTally {
    pub pending: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Aggregate counts for operational visibility.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_artifacts: usize,
    pub total_deliveries: usize,
    /// Keyed by destination name, sorted.
    pub by_destination: std::collections::BTreeMap<String, DestinationTally>,
}
