//! Network quality estimation.
//!
//! Classifies the active connection into a tier and maps each tier to a
//! target resolution and video bitrate. The mapping is a fixed table with no
//! hidden state; missing capability data degrades to [`NetworkTier::Unknown`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::{HIGH_TIER, LOW_TIER};

/// Link technologies a connectivity report can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Wifi,
    Cellular,
    Ethernet,
    Bluetooth,
    Vpn,
}

/// Capabilities of a network as reported by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkCapabilities {
    pub transports: Vec<TransportKind>,
}

impl NetworkCapabilities {
    pub fn with_transport(kind: TransportKind) -> Self {
        Self {
            transports: vec![kind],
        }
    }

    pub fn has_transport(&self, kind: TransportKind) -> bool {
        self.transports.contains(&kind)
    }
}

/// Connectivity change notification pushed by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Available(Option<NetworkCapabilities>),
    CapabilitiesChanged(NetworkCapabilities),
    Lost,
}

/// Synchronous query for the currently active network.
pub trait ConnectivityProbe: Send + Sync {
    /// `None` when there is no active network or its capabilities are unknown.
    fn active_capabilities(&self) -> Option<NetworkCapabilities>;
}

/// Network quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkTier {
    Wifi,
    Cellular,
    Other,
    Unknown,
    Disconnected,
}

impl NetworkTier {
    pub fn label(&self) -> &'static str {
        match self {
            NetworkTier::Wifi => "WIFI",
            NetworkTier::Cellular => "CELLULAR",
            NetworkTier::Other => "OTHER",
            NetworkTier::Unknown => "UNKNOWN",
            NetworkTier::Disconnected => "DISCONNECTED",
        }
    }

    /// Target `(width, height, bitrate_bps)` for this tier.
    ///
    /// Other/unknown links report a 480-pixel square target; the encoder
    /// snaps it to the low tier (see [`NetworkQuality::encoder_resolution`]).
    pub fn targets(&self) -> (u32, u32, u32) {
        match self {
            NetworkTier::Wifi => (HIGH_TIER.0, HIGH_TIER.1, 2_000_000),
            NetworkTier::Cellular => (LOW_TIER.0, LOW_TIER.1, 900_000),
            NetworkTier::Other => (480, 480, 700_000),
            NetworkTier::Unknown | NetworkTier::Disconnected => (480, 480, 600_000),
        }
    }

    /// Tier for a capability report. Wifi wins when several transports are present.
    pub fn from_capabilities(caps: Option<&NetworkCapabilities>) -> Self {
        match caps {
            None => NetworkTier::Unknown,
            Some(caps) if caps.has_transport(TransportKind::Wifi) => NetworkTier::Wifi,
            Some(caps) if caps.has_transport(TransportKind::Cellular) => NetworkTier::Cellular,
            Some(_) => NetworkTier::Other,
        }
    }
}

impl std::fmt::Display for NetworkTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkQuality {
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u32,
    pub tier: NetworkTier,
}

impl NetworkQuality {
    pub fn for_tier(tier: NetworkTier) -> Self {
        let (width, height, bitrate_bps) = tier.targets();
        Self {
            width,
            height,
            bitrate_bps,
            tier,
        }
    }

    /// Supported encoder resolution for this target: 1280x720 for the wifi
    /// width, 854x480 for everything else.
    pub fn encoder_resolution(&self) -> (u32, u32) {
        if self.width == HIGH_TIER.0 {
            HIGH_TIER
        } else {
            LOW_TIER
        }
    }

    pub fn label(&self) -> &'static str {
        self.tier.label()
    }
}

/// Maps the active connection to a [`NetworkQuality`].
#[derive(Clone)]
pub struct NetworkQualityEstimator {
    probe: Arc<dyn ConnectivityProbe>,
}

impl NetworkQualityEstimator {
    pub fn new(probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self { probe }
    }

    /// Classifies the currently active network.
    pub fn classify(&self) -> NetworkQuality {
        let caps = self.probe.active_capabilities();
        Self::classify_capabilities(caps.as_ref())
    }

    /// Classifies a specific capability report (as carried by a connectivity event).
    pub fn classify_capabilities(caps: Option<&NetworkCapabilities>) -> NetworkQuality {
        NetworkQuality::for_tier(NetworkTier::from_capabilities(caps))
    }
}

impl std::fmt::Debug for NetworkQualityEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkQualityEstimator").finish_non_exhaustive()
    }
}
