//! Twist of fate: range-keyed outcome tables resolved with a d100.
//!
//! A stakes text looks like `"1-30: the rope snaps 31-100: you make it across"`.
//! Every roll in 1..=100 must map to exactly one outcome before anything is
//! drawn, so a malformed table is rejected rather than silently resolved.

use crate::error::StakesError;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const MIN_ROLL: u32 = 1;
pub const MAX_ROLL: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRange {
    pub min: u32,
    pub max: u32,
    pub outcome: String,
}

impl OutcomeRange {
    pub fn contains(&self, roll: u32) -> bool {
        (self.min..=self.max).contains(&roll)
    }
}

// Ranges sorted by `min`, disjoint and covering 1..=100 exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakesSpec {
    ranges: Vec<OutcomeRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResult {
    pub roll: u32,
    pub outcome: String,
}

// What the narrator sees after asking for a twist of fate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TwistOutcome {
    Rolled(RollResult),
    Rejected { error: String },
}

impl StakesSpec {
    pub fn parse(text: &str) -> Result<Self, StakesError> {
        let markers = scan_markers(text);
        let mut ranges: Vec<OutcomeRange> = markers
            .iter()
            .enumerate()
            .filter_map(|(i, marker)| {
                let until = markers.get(i + 1).map_or(text.len(), |next| next.start);
                let outcome = text[marker.end..until].trim();
                (!outcome.is_empty()).then(|| OutcomeRange {
                    min: marker.min,
                    max: marker.max,
                    outcome: outcome.to_string(),
                })
            })
            .collect();

        if ranges.is_empty() {
            return Err(StakesError::NoRanges);
        }
        if let Some(bad) = ranges.iter().find(|r| r.min > r.max) {
            return Err(StakesError::Inverted {
                min: bad.min,
                max: bad.max,
            });
        }

        ranges.sort_by_key(|r| r.min);

        let first = &ranges[0];
        if first.min != MIN_ROLL {
            return Err(StakesError::MustStartAtOne(first.min));
        }
        let last = &ranges[ranges.len() - 1];
        if last.max != MAX_ROLL {
            return Err(StakesError::MustEndAtHundred(last.max));
        }
        for pair in ranges.windows(2) {
            if pair[1].min > pair[0].max.saturating_add(1) {
                return Err(StakesError::Gap {
                    prev_max: pair[0].max,
                    next_min: pair[1].min,
                });
            }
        }
        for pair in ranges.windows(2) {
            if pair[1].min <= pair[0].max {
                return Err(StakesError::Overlap {
                    prev_max: pair[0].max,
                    next_min: pair[1].min,
                });
            }
        }

        Ok(Self { ranges })
    }

    pub fn ranges(&self) -> &[OutcomeRange] {
        &self.ranges
    }

    pub fn outcome_for(&self, roll: u32) -> Result<&str, StakesError> {
        self.ranges
            .iter()
            .find(|range| range.contains(roll))
            .map(|range| range.outcome.as_str())
            .ok_or(StakesError::RollOutOfRange(roll))
    }

    pub fn resolve_roll(&self, roll: u32) -> Result<RollResult, StakesError> {
        let outcome = self.outcome_for(roll)?.to_string();
        Ok(RollResult { roll, outcome })
    }

    pub fn roll(&self, rng: &mut impl Rng) -> Result<RollResult, StakesError> {
        self.resolve_roll(rng.random_range(MIN_ROLL..=MAX_ROLL))
    }
}

/// Parse and resolve a stakes text with the thread-local RNG.
///
/// This is the only place the game draws a fate roll.
pub fn twist_of_fate(stakes: &str) -> TwistOutcome {
    let resolved = StakesSpec::parse(stakes).and_then(|spec| spec.roll(&mut rand::rng()));
    match resolved {
        Ok(result) => {
            log::info!("Twist of fate rolled {}: {}", result.roll, result.outcome);
            TwistOutcome::Rolled(result)
        }
        Err(e) => {
            log::debug!("Rejected stakes {stakes:?}: {e}");
            TwistOutcome::Rejected {
                error: e.to_string(),
            }
        }
    }
}

struct Marker {
    start: usize,
    end: usize,
    min: u32,
    max: u32,
}

// Finds every `<min>-<max>:` marker. A marker only starts at the first digit of a number.
fn scan_markers(text: &str) -> Vec<Marker> {
    let bytes = text.as_bytes();
    let mut markers = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let at_number_start = bytes[i].is_ascii_digit() && (i == 0 || !bytes[i - 1].is_ascii_digit());
        if at_number_start {
            if let Some(marker) = marker_at(bytes, i) {
                i = marker.end;
                markers.push(marker);
                continue;
            }
        }
        i += 1;
    }
    markers
}

fn marker_at(bytes: &[u8], start: usize) -> Option<Marker> {
    let (min, i) = number_at(bytes, start)?;
    let i = skip_spaces(bytes, i);
    if bytes.get(i) != Some(&b'-') {
        return None;
    }
    let i = skip_spaces(bytes, i + 1);
    let (max, i) = number_at(bytes, i)?;
    let i = skip_spaces(bytes, i);
    if bytes.get(i) != Some(&b':') {
        return None;
    }
    Some(Marker {
        start,
        end: i + 1,
        min,
        max,
    })
}

fn number_at(bytes: &[u8], start: usize) -> Option<(u32, usize)> {
    let len = bytes[start.min(bytes.len())..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if len == 0 {
        return None;
    }
    let digits = std::str::from_utf8(&bytes[start..start + len]).ok()?;
    let value = digits.parse().ok()?;
    Some((value, start + len))
}

fn skip_spaces(bytes: &[u8], mut i: usize) -> usize {
    while bytes.get(i).is_some_and(|b| *b == b' ' || *b == b'\t') {
        i += 1;
    }
    i
}
