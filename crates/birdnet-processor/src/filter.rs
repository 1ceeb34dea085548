//! Species filter.
//!
//! Decides whether a detection is reported at all, from the confidence
//! threshold, the range-filter inclusion list, and the user exclusion list.

use std::collections::HashSet;

use birdnet_core::config::Settings;
use birdnet_core::events::SuppressReason;
use birdnet_core::types::{normalize_name, Detection, Species};

/// Inclusion and exclusion species lists, normalized for lookup.
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    include: HashSet<String>,
    exclude: HashSet<String>,
}

impl FilterPolicy {
    pub fn new<I, E, S, T>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            include: normalize_all(include),
            exclude: normalize_all(exclude),
        }
    }

    /// Inclusion from the range filter, exclusion from the realtime species settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.birdnet.range_filter.species,
            &settings.realtime.species.exclude,
        )
    }

    pub fn is_excluded(&self, species: &Species) -> bool {
        !self.exclude.is_empty() && contains_any(&self.exclude, species)
    }

    /// An empty inclusion list places no restriction.
    pub fn is_included(&self, species: &Species) -> bool {
        self.include.is_empty() || contains_any(&self.include, species)
    }
}

/// Outcome of filtering one detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Pass,
    Suppress(SuppressReason),
}

impl FilterDecision {
    pub fn is_pass(&self) -> bool {
        matches!(self, FilterDecision::Pass)
    }
}

/// Evaluate a detection against the policy and threshold.
///
/// Exclusion is checked before inclusion and vetoes unconditionally, so a
/// species on both lists is always suppressed. A NaN score never passes.
pub fn evaluate(detection: &Detection, policy: &FilterPolicy, threshold: f32) -> FilterDecision {
    if detection.confidence.is_nan() || detection.confidence < threshold {
        return FilterDecision::Suppress(SuppressReason::BelowThreshold);
    }
    if policy.is_excluded(&detection.species) {
        return FilterDecision::Suppress(SuppressReason::Excluded);
    }
    if !policy.is_included(&detection.species) {
        return FilterDecision::Suppress(SuppressReason::NotIncluded);
    }
    FilterDecision::Pass
}

/// `true` if the detection passes.
pub fn filter(detection: &Detection, policy: &FilterPolicy, threshold: f32) -> bool {
    evaluate(detection, policy, threshold).is_pass()
}

/// A policy bound to a threshold, built once from settings.
#[derive(Debug, Clone)]
pub struct SpeciesFilter {
    policy: FilterPolicy,
    threshold: f32,
}

impl SpeciesFilter {
    pub fn new(policy: FilterPolicy, threshold: f32) -> Self {
        Self { policy, threshold }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            FilterPolicy::from_settings(settings),
            settings.birdnet.threshold,
        )
    }

    pub fn evaluate(&self, detection: &Detection) -> FilterDecision {
        evaluate(detection, &self.policy, self.threshold)
    }

    pub fn passes(&self, detection: &Detection) -> bool {
        self.evaluate(detection).is_pass()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

fn normalize_all<I, S>(names: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|n| normalize_name(n.as_ref()))
        .filter(|n| !n.is_empty())
        .collect()
}

fn contains_any(set: &HashSet<String>, species: &Species) -> bool {
    species.match_keys().iter().any(|key| set.contains(key))
}
