//! Acquired page content handed to the extractor.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the content was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    Lightweight,
    Rendered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialLink {
    pub url: String,
    pub text: String,
}

/// Why the dynamic-content loop terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxIterations,
    NoChange,
    Stalled,
    WallClock,
    DomHeight,
    ContentItems,
    RunawayGrowth,
    SustainedGrowth,
    PageClosed,
    MeasurementFailed,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MaxIterations => "max_iterations",
            Self::NoChange => "no_change",
            Self::Stalled => "stalled",
            Self::WallClock => "wall_clock",
            Self::DomHeight => "dom_height",
            Self::ContentItems => "content_items",
            Self::RunawayGrowth => "runaway_growth",
            Self::SustainedGrowth => "sustained_growth",
            Self::PageClosed => "page_closed",
            Self::MeasurementFailed => "measurement_failed",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostics of one exploration run. Never feeds back into extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorationReport {
    pub final_height: u64,
    pub final_items: u64,
    pub iterations: u32,
    pub pages: u32,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContent {
    pub url: String,
    pub title: String,
    pub meta_description: String,
    pub html: String,
    /// Visible text with boilerplate elements removed and whitespace collapsed.
    pub text: String,
    pub social_links: BTreeMap<String, Vec<SocialLink>>,
    pub emails: Vec<String>,
    pub method: FetchMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exploration: Option<ExplorationReport>,
}

impl PageContent {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_elapsed_as_millis() {
        let report = ExplorationReport {
            final_height: 1200,
            final_items: 40,
            iterations: 3,
            pages: 0,
            elapsed: Duration::from_millis(2500),
            stop_reason: StopReason::NoChange,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["elapsed"], 2500);
        assert_eq!(json["stop_reason"], "no_change");
    }

    #[test]
    fn stop_reason_display_matches_serde() {
        for reason in [StopReason::RunawayGrowth, StopReason::SustainedGrowth, StopReason::WallClock] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason));
        }
    }
}
