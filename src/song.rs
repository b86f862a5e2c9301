//! Song structure supplied by the planning side of the application.
//!
//! These types are read-only inputs: the live core never edits a song, it
//! only looks sections up by position or name.

use serde::{Deserialize, Serialize};

/// Beats per bar used for bar countdowns (songs are assumed to be in 4/4).
pub const BEATS_PER_BAR: u32 = 4;

/// A named time span within a song, e.g. "Verse 1" or "Chorus".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub name: String,
    pub start_ms: u64,
    /// Exclusive end of the section.
    pub end_ms: u64,
}

impl Section {
    pub fn new(name: impl Into<String>, start_ms: u64, end_ms: u64) -> Self {
        Self {
            name: name.into(),
            start_ms,
            end_ms,
        }
    }

    /// Returns true if `position_ms` falls inside `[start_ms, end_ms)`.
    pub fn contains(&self, position_ms: u64) -> bool {
        position_ms >= self.start_ms && position_ms < self.end_ms
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Case-insensitive name comparison used for scene binding.
    pub fn name_matches(&self, label: &str) -> bool {
        self.name.eq_ignore_ascii_case(label.trim())
    }
}

/// A song as the live core sees it: a title and its ordered sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub title: String,
    pub sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,
}

impl Song {
    pub fn new(title: impl Into<String>, sections: Vec<Section>) -> Self {
        Self {
            title: title.into(),
            sections,
            key: None,
            bpm: None,
        }
    }

    /// Returns the index and section that contains `position_ms`.
    pub fn section_at(&self, position_ms: u64) -> Option<(usize, &Section)> {
        section_at(&self.sections, position_ms)
    }

    /// Returns the section following `index`, if any.
    pub fn next_section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index + 1)
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }
}

/// Finds the section containing `position_ms`.
///
/// Sections are searched in order; the first match wins if the supplied data
/// overlaps.
pub fn section_at(sections: &[Section], position_ms: u64) -> Option<(usize, &Section)> {
    sections
        .iter()
        .enumerate()
        .find(|(_, s)| s.contains(position_ms))
}

/// Whole bars remaining until `boundary_ms`, rounded up.
///
/// Returns 0 once the boundary is reached or when the tempo is unusable.
pub fn bars_until(position_ms: u64, boundary_ms: u64, bpm: f64) -> u32 {
    if bpm <= 0.0 || !bpm.is_finite() || position_ms >= boundary_ms {
        return 0;
    }
    let bar_ms = 60_000.0 / bpm * BEATS_PER_BAR as f64;
    let remaining = (boundary_ms - position_ms) as f64;
    (remaining / bar_ms).ceil() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worship_song() -> Song {
        Song::new(
            "Great Is Thy Faithfulness",
            vec![
                Section::new("Verse", 0, 30_000),
                Section::new("Chorus", 30_000, 60_000),
                Section::new("Tag", 60_000, 72_000),
            ],
        )
    }

    #[test]
    fn test_section_at_is_half_open() {
        let song = worship_song();
        assert_eq!(song.section_at(0).map(|(i, _)| i), Some(0));
        assert_eq!(song.section_at(29_999).map(|(i, _)| i), Some(0));
        assert_eq!(song.section_at(30_000).map(|(i, _)| i), Some(1));
        assert!(song.section_at(72_000).is_none());
    }

    #[test]
    fn test_name_matches_ignores_case() {
        let section = Section::new("Chorus", 0, 1);
        assert!(section.name_matches("chorus"));
        assert!(section.name_matches(" CHORUS "));
        assert!(!section.name_matches("Chorus 2"));
    }

    #[test]
    fn test_bars_until_rounds_up() {
        // 120 bpm in 4/4: one bar is 2000 ms.
        assert_eq!(bars_until(0, 4_000, 120.0), 2);
        assert_eq!(bars_until(0, 4_001, 120.0), 3);
        assert_eq!(bars_until(3_999, 4_000, 120.0), 1);
        assert_eq!(bars_until(4_000, 4_000, 120.0), 0);
        assert_eq!(bars_until(0, 4_000, 0.0), 0);
    }

    #[test]
    fn test_song_json_uses_camel_case() {
        let song = worship_song();
        let json = serde_json::to_string(&song).unwrap();
        assert!(json.contains("\"startMs\":30000"));
        let parsed: Song = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, song);
    }
}
