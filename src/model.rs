/*!
 * Session Data Model
 *
 * Match identity, stream destination, encoder profiles and the score state
 * derived from per-set point arrays.
 */

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::validation;

/// Low resolution tier used for cellular links and soft restarts.
pub const LOW_TIER: (u32, u32) = (854, 480);
/// High resolution tier used on wifi.
pub const HIGH_TIER: (u32, u32) = (1280, 720);
/// Frame rate used for every live profile.
pub const DEFAULT_FPS: u32 = 25;
/// Video bitrate applied by a soft restart to the low tier.
pub const SOFT_RESTART_BITRATE_BPS: u32 = 900_000;

/// Identity of the match being streamed. Immutable for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchIdentity {
    pub match_id: String,
    pub team_a: String,
    pub team_b: String,
}

impl MatchIdentity {
    /// Validates the match id and normalizes both team names.
    pub fn new(
        match_id: impl Into<String>,
        team_a: &str,
        team_b: &str,
    ) -> Result<Self, StreamError> {
        let match_id = match_id.into();
        validation::validate_match_id(&match_id)
            .map_err(|e| StreamError::InvalidMatch(e.to_string()))?;

        Ok(Self {
            match_id,
            team_a: validation::normalize_team_name(team_a, "Team A"),
            team_b: validation::normalize_team_name(team_b, "Team B"),
        })
    }
}

/// RTMP/RTMPS ingest URL for the live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDestination {
    rtmp_url: String,
}

impl StreamDestination {
    pub fn parse(url: &str) -> Result<Self, StreamError> {
        validation::validate_destination_url(url)
            .map_err(|e| StreamError::InvalidDestination(e.to_string()))?;
        Ok(Self {
            rtmp_url: url.trim().to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.rtmp_url
    }

    pub fn is_secure(&self) -> bool {
        self.rtmp_url.starts_with("rtmps://")
    }
}

/// Video codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    /// H.264/AVC codec (widely supported)
    H264,
    /// H.265/HEVC codec (better compression, less support)
    H265,
}

/// Audio encoder parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioProfile {
    pub bitrate_bps: u32,
    pub sample_rate: u32,
    pub stereo: bool,
}

impl Default for AudioProfile {
    fn default() -> Self {
        Self {
            bitrate_bps: 128_000,
            sample_rate: 48_000,
            stereo: true,
        }
    }
}

/// Active encoder configuration.
///
/// Only the controller mutates the live profile; everything else works on
/// copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamVideoProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate_bps: u32,
    pub codec: Codec,
    pub audio: AudioProfile,
}

impl StreamVideoProfile {
    pub fn new(width: u32, height: u32, video_bitrate_bps: u32) -> Self {
        Self {
            width,
            height,
            fps: DEFAULT_FPS,
            video_bitrate_bps,
            codec: Codec::H264,
            audio: AudioProfile::default(),
        }
    }

    /// Fixed profile a soft restart falls back to: 854x480 @ 900 kbps, 25 fps.
    pub fn low_tier_fallback() -> Self {
        Self::new(LOW_TIER.0, LOW_TIER.1, SOFT_RESTART_BITRATE_BPS)
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_low_tier(&self) -> bool {
        self.resolution() == LOW_TIER
    }

    /// True for the resolutions the encoder is ever configured with.
    pub fn is_supported_resolution(&self) -> bool {
        matches!(self.resolution(), LOW_TIER | HIGH_TIER)
    }

    pub fn pixel_count(&self) -> u32 {
        self.width * self.height
    }

    pub fn with_bitrate(mut self, video_bitrate_bps: u32) -> Self {
        self.video_bitrate_bps = video_bitrate_bps;
        self
    }
}

impl Default for StreamVideoProfile {
    fn default() -> Self {
        Self::low_tier_fallback()
    }
}

/// Which side of the net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    TeamA,
    TeamB,
}

/// Per-set point totals as pushed by the scoring service. The last element of
/// each array is the set in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetScores {
    #[serde(rename = "teamASets")]
    pub team_a_sets: Vec<u32>,
    #[serde(rename = "teamBSets")]
    pub team_b_sets: Vec<u32>,
}

/// Points of the set in progress and completed sets won by each team.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScoreState {
    pub team_a_points: u32,
    pub team_b_points: u32,
    pub team_a_sets_won: u32,
    pub team_b_sets_won: u32,
}

impl ScoreState {
    pub fn new(team_a_points: u32, team_b_points: u32, team_a_sets_won: u32, team_b_sets_won: u32) -> Self {
        Self {
            team_a_points,
            team_b_points,
            team_a_sets_won,
            team_b_sets_won,
        }
    }

    /// Derives the score from per-set arrays.
    ///
    /// Points are the last element of each array. Completed sets are counted
    /// over indices `0..min(len_a, len_b) - 1`; the final shared index is the
    /// set in progress and ties count for neither side. Returns `None` when
    /// either array is empty.
    pub fn from_sets(sets: &SetScores) -> Option<Self> {
        let team_a_points = *sets.team_a_sets.last()?;
        let team_b_points = *sets.team_b_sets.last()?;

        let completed = sets.team_a_sets.len().min(sets.team_b_sets.len()) - 1;
        let (mut team_a_sets_won, mut team_b_sets_won) = (0, 0);
        for (a, b) in sets
            .team_a_sets
            .iter()
            .zip(sets.team_b_sets.iter())
            .take(completed)
        {
            if a > b {
                team_a_sets_won += 1;
            } else if b > a {
                team_b_sets_won += 1;
            }
        }

        Some(Self {
            team_a_points,
            team_b_points,
            team_a_sets_won,
            team_b_sets_won,
        })
    }

    /// Team with more completed sets, `None` on a tie.
    pub fn set_leader(&self) -> Option<Side> {
        match self.team_a_sets_won.cmp(&self.team_b_sets_won) {
            std::cmp::Ordering::Greater => Some(Side::TeamA),
            std::cmp::Ordering::Less => Some(Side::TeamB),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// The four integers that decide whether the overlay needs a redraw.
    pub fn as_array(&self) -> [u32; 4] {
        [
            self.team_a_points,
            self.team_b_points,
            self.team_a_sets_won,
            self.team_b_sets_won,
        ]
    }
}
