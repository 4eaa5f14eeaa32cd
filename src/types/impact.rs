use serde::{Deserialize, Serialize};
use std::fmt;

/// Impact level of an economic event on the market.
/// The calendar source marks these with colored icons: yellow (low),
/// orange (medium), red (high), gray (bank holiday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Holiday,
    Low,
    Medium,
    High,
}

impl Impact {
    /// Parse from the source's impact icon class names,
    /// e.g. "icon--ff-impact-yel" -> Low, "icon--ff-impact-red" -> High.
    /// Unknown markers default to Low.
    pub fn from_marker_class(class: &str) -> Self {
        if class.contains("red") {
            Impact::High
        } else if class.contains("ora") || class.contains("orange") {
            Impact::Medium
        } else if class.contains("gra") || class.contains("holiday") {
            Impact::Holiday
        } else {
            Impact::Low
        }
    }

    /// Canonical lowercase token, matching the persisted representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Impact::Holiday => "holiday",
            Impact::Low => "low",
            Impact::Medium => "medium",
            Impact::High => "high",
        }
    }

    /// Parse the persisted token. Unknown tokens default to Low.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Impact::High,
            "medium" => Impact::Medium,
            "holiday" => Impact::Holiday,
            _ => Impact::Low,
        }
    }
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_marker_class() {
        assert_eq!(Impact::from_marker_class("icon--ff-impact-yel"), Impact::Low);
        assert_eq!(
            Impact::from_marker_class("icon--ff-impact-ora"),
            Impact::Medium
        );
        assert_eq!(
            Impact::from_marker_class("icon--ff-impact-red"),
            Impact::High
        );
        assert_eq!(
            Impact::from_marker_class("icon--ff-impact-gra"),
            Impact::Holiday
        );
        // Unknown marker falls back to low
        assert_eq!(Impact::from_marker_class("icon--ff-impact-???"), Impact::Low);
        assert_eq!(Impact::from_marker_class(""), Impact::Low);
    }

    #[test]
    fn test_round_trip_tokens() {
        for impact in [Impact::Holiday, Impact::Low, Impact::Medium, Impact::High] {
            assert_eq!(Impact::from_str_lossy(impact.as_str()), impact);
        }
        // Capitalized legacy tokens normalize to the lowercase canon
        assert_eq!(Impact::from_str_lossy("High"), Impact::High);
        assert_eq!(Impact::from_str_lossy("HOLIDAY"), Impact::Holiday);
        // Unknown tokens default to low
        assert_eq!(Impact::from_str_lossy("severe"), Impact::Low);
    }

    #[test]
    fn test_ordering() {
        assert!(Impact::Holiday < Impact::Low);
        assert!(Impact::Low < Impact::Medium);
        assert!(Impact::Medium < Impact::High);
    }

    #[test]
    fn test_display_is_lowercase() {
        assert_eq!(format!("{}", Impact::High), "high");
        assert_eq!(format!("{}", Impact::Holiday), "holiday");
    }
}
