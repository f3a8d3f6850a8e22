// SPDX-License-Identifier: MIT OR Apache-2.0
//! Document-scanner state machine and quadrilateral sanity checks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Long edge of the perspective-corrected output image, in pixels.
pub const SCAN_OUTPUT_LONG_EDGE: u32 = 800;

/// WebP quality of the perspective-corrected output.
pub const SCAN_OUTPUT_QUALITY: f32 = 0.85;

// ---------------------------------------------------------------------------
// ScanPhase
// ---------------------------------------------------------------------------

/// Phase of a scanning session.
///
/// `idle → scanning → previewing → (cropping ↔ previewing) → confirmed →
/// idle`, with `error` branching off `scanning` and `cropping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    /// Nothing in progress.
    Idle,
    /// The camera is hunting for a document.
    Scanning,
    /// A candidate detection is on screen.
    Previewing,
    /// The user is adjusting corners.
    Cropping,
    /// A result was produced; the session winds back to idle.
    Confirmed,
    /// Detection or correction failed.
    Error,
}

impl ScanPhase {
    /// The set of phases that are valid successors of `self`.
    pub fn valid_transitions(&self) -> &'static [ScanPhase] {
        match self {
            Self::Idle => &[Self::Scanning],
            Self::Scanning => &[Self::Previewing, Self::Error],
            Self::Previewing => &[Self::Cropping, Self::Confirmed],
            Self::Cropping => &[Self::Previewing, Self::Error],
            Self::Confirmed => &[Self::Idle],
            Self::Error => &[Self::Idle],
        }
    }

    /// Returns `true` if transitioning from `self` to `next` is valid.
    pub fn can_transition_to(&self, next: ScanPhase) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Previewing => "previewing",
            Self::Cropping => "cropping",
            Self::Confirmed => "confirmed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Error raised by an invalid scanner transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid scanner transition {from} -> {to}")]
pub struct ScanError {
    /// Phase the scanner was in.
    pub from: ScanPhase,
    /// Phase the caller asked for.
    pub to: ScanPhase,
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// A 2-D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal coordinate, pixels from the left edge.
    pub x: f64,
    /// Vertical coordinate, pixels from the top edge.
    pub y: f64,
}

impl Point {
    fn is_sane(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.x >= 0.0 && self.y >= 0.0
    }
}

/// A candidate document quadrilateral, corners in traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    /// Corners in order (clockwise or counter-clockwise).
    pub corners: [Point; 4],
}

impl Quad {
    /// Purity check for a detector-produced quadrilateral.
    ///
    /// All four corners must be finite, non-negative, and pairwise
    /// distinct, and the polygon must be convex: the cross products of
    /// consecutive edge vectors all carry the same sign.
    pub fn is_valid(&self) -> bool {
        if !self.corners.iter().all(Point::is_sane) {
            return false;
        }
        for i in 0..4 {
            for j in (i + 1)..4 {
                if self.corners[i] == self.corners[j] {
                    return false;
                }
            }
        }
        self.is_convex()
    }

    fn is_convex(&self) -> bool {
        let mut sign = 0.0f64;
        for i in 0..4 {
            let a = self.corners[i];
            let b = self.corners[(i + 1) % 4];
            let c = self.corners[(i + 2) % 4];
            let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
            if cross == 0.0 {
                // Collinear corners collapse the quad.
                return false;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Result handed to the upload pipeline when a session confirms.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    /// Output blob: perspective-corrected, or the original on skip-crop.
    pub blob: Vec<u8>,
    /// Whether perspective correction ran.
    pub cropped: bool,
    /// The quadrilateral that was applied, when one was.
    pub quad: Option<Quad>,
}

/// Scanner session controller.
///
/// Holds nothing but the phase; image data flows through the caller.
#[derive(Debug, Default)]
pub struct Scanner {
    phase: ScanPhase,
}

impl Default for ScanPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl Scanner {
    /// New scanner at `idle`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// Attempt a transition.
    pub fn transition(&mut self, to: ScanPhase) -> Result<(), ScanError> {
        if !self.phase.can_transition_to(to) {
            return Err(ScanError {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Confirm with perspective correction applied.
    ///
    /// Valid only from `previewing`; the quad must pass [`Quad::is_valid`].
    pub fn confirm_cropped(&mut self, blob: Vec<u8>, quad: Quad) -> Result<ScanResult, ScanError> {
        if !quad.is_valid() {
            // A degenerate quad is a detection failure, not a user error.
            self.transition(ScanPhase::Cropping).ok();
            self.transition(ScanPhase::Error)?;
            return Err(ScanError {
                from: ScanPhase::Previewing,
                to: ScanPhase::Confirmed,
            });
        }
        self.transition(ScanPhase::Confirmed)?;
        Ok(ScanResult {
            blob,
            cropped: true,
            quad: Some(quad),
        })
    }

    /// Skip-crop exit: the original blob passes through unchanged.
    pub fn confirm_uncropped(&mut self, blob: Vec<u8>) -> Result<ScanResult, ScanError> {
        self.transition(ScanPhase::Confirmed)?;
        Ok(ScanResult {
            blob,
            cropped: false,
            quad: None,
        })
    }

    /// Wind a finished or failed session back to `idle`.
    pub fn reset(&mut self) -> Result<(), ScanError> {
        self.transition(ScanPhase::Idle)
    }
}
