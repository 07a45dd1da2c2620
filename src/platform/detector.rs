//! Detects which platforms an input string could refer to.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::{Platform, PlatformCatalog};

/// A platform whose patterns matched, with the named captures of the match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
  pub platform: Platform,
  pub fields: BTreeMap<String, String>,
  /// True when the match came from a URL pattern.
  pub from_url: bool,
}

/// Matches input against a [`PlatformCatalog`].
///
/// URL patterns are authoritative: if any platform's URL pattern matches, only
/// URL matches are reported and bare-identifier patterns are never consulted.
/// Otherwise every platform's identifier patterns are checked, so colliding
/// formats (e.g. `TEAM-123`) yield several detections in catalog order.
#[derive(Debug, Clone)]
pub struct PlatformDetector {
  catalog: Arc<PlatformCatalog>,
}

impl PlatformDetector {
  pub fn new(catalog: Arc<PlatformCatalog>) -> Self {
    Self { catalog }
  }

  pub fn detect(&self, input: &str) -> Vec<Detection> {
    let input = input.trim();
    if input.is_empty() {
      return Vec::new();
    }

    let url_matches: Vec<Detection> = self
      .catalog
      .iter()
      .filter_map(|entry| {
        entry.match_url(input).map(|fields| Detection {
          platform: entry.platform(),
          fields,
          from_url: true,
        })
      })
      .collect();

    if !url_matches.is_empty() {
      debug!(input, platforms = ?platforms_of(&url_matches), "Detected platform from URL");
      return url_matches;
    }

    let id_matches: Vec<Detection> = self
      .catalog
      .iter()
      .filter_map(|entry| {
        entry.match_id(input).map(|fields| Detection {
          platform: entry.platform(),
          fields,
          from_url: false,
        })
      })
      .collect();

    debug!(input, platforms = ?platforms_of(&id_matches), "Detected platforms from identifier");
    id_matches
  }

  /// Just the platforms from [`detect`](Self::detect), in order.
  pub fn candidates(&self, input: &str) -> Vec<Platform> {
    platforms_of(&self.detect(input))
  }

  /// Every platform the catalog can recognize, in detection order.
  pub fn platforms(&self) -> Vec<Platform> {
    self.catalog.platforms()
  }
}

fn platforms_of(detections: &[Detection]) -> Vec<Platform> {
  detections.iter().map(|d| d.platform).collect()
}
