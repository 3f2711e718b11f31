//! Timed status effects and the visuals derived from them.
//!
//! The server announces an effect catalog once, in the join payload: for each
//! effect name a full `duration` in seconds and an optional `decay` factor.
//! Snapshots then carry the remaining seconds of each active effect per
//! player. From those two inputs this module derives a player's opacity
//! (`alpha`) and head glow.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::world::Rgb;

/// Lowest opacity the local player can fade to.
pub const MIN_VISIBLE_ALPHA: f64 = 0.2;

/// Decay factor at which both invisibility branches meet at `D / F`.
pub const CONTINUOUS_DECAY_FACTOR: f64 = 1.5;

// ---------------------------------------------------------------------------
// EffectCatalog
// ---------------------------------------------------------------------------

/// Static description of one effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectSpec {
    /// Full duration in seconds. Always positive.
    pub duration: f64,
    pub decay: Option<f64>,
}

/// Effect name → spec, loaded from the join payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectCatalog {
    effects: BTreeMap<String, EffectSpec>,
}

impl EffectCatalog {
    /// Parse `{name: {"duration": s, "decay": f?}}`. A bare number is read as
    /// the duration. Entries without a positive duration are skipped.
    pub fn from_value(value: &Value) -> Self {
        let mut effects = BTreeMap::new();
        let Some(object) = value.as_object() else {
            warn!("effect catalog is not an object, ignoring it");
            return Self { effects };
        };

        for (name, entry) in object {
            let (duration, decay) = match entry {
                Value::Number(n) => (n.as_f64(), None),
                Value::Object(fields) => (
                    fields.get("duration").and_then(Value::as_f64),
                    fields.get("decay").and_then(Value::as_f64),
                ),
                _ => (None, None),
            };
            match duration {
                Some(duration) if duration > 0.0 && duration.is_finite() => {
                    let decay = decay.filter(|f| *f > 0.0 && f.is_finite());
                    effects.insert(name.clone(), EffectSpec { duration, decay });
                }
                _ => warn!(effect = %name, "skipping effect without a positive duration"),
            }
        }

        Self { effects }
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: EffectSpec) {
        self.effects.insert(name.into(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&EffectSpec> {
        self.effects.get(name)
    }

    pub fn duration(&self, name: &str) -> Option<f64> {
        self.get(name).map(|e| e.duration)
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EffectSpec)> {
        self.effects.iter().map(|(k, v)| (k.as_str(), v))
    }
}

// ---------------------------------------------------------------------------
// Effect names
// ---------------------------------------------------------------------------

/// Which catalog entries play which visual role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectNames {
    pub reveal: String,
    pub invisibility: String,
    pub invulnerable: String,
    pub shielded: String,
}

impl Default for EffectNames {
    fn default() -> Self {
        Self {
            reveal: "reveal".into(),
            invisibility: "invisible".into(),
            invulnerable: "invulnerable".into(),
            shielded: "shield".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Alpha
// ---------------------------------------------------------------------------

/// Durations and decay factor feeding [`alpha`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlphaParams {
    /// Full reveal duration `R`.
    pub reveal_duration: Option<f64>,
    /// Full invisibility duration `D`.
    pub invisibility_duration: Option<f64>,
    /// Decay factor `F`.
    pub decay: f64,
}

/// Opacity for a player with `reveal` and `invis` seconds remaining.
///
/// While revealing, alpha ramps from 0 to 1 over `R` and is not clamped.
/// Otherwise, with `D` the invisibility duration and `F` the decay factor:
///
/// ```text
/// invis > D/F :  clamp(1 - (D - invis)·F/D, 0, 1)
/// otherwise   :  min(1, (1 - invis/D)·F)
/// ```
///
/// and the result is raised to [`MIN_VISIBLE_ALPHA`] unless
/// `totally_transparent`.
pub fn alpha(reveal: f64, invis: f64, params: AlphaParams, totally_transparent: bool) -> f64 {
    if let Some(r) = params.reveal_duration
        && r > 0.0
        && reveal > 0.0
        && reveal <= r
    {
        return (1.0 - reveal / r).min(1.0);
    }

    let raw = match params.invisibility_duration {
        Some(d) if d > 0.0 => {
            let f = params.decay;
            if invis > d / f {
                (1.0 - (d - invis) * f / d).clamp(0.0, 1.0)
            } else {
                ((1.0 - invis / d) * f).min(1.0)
            }
        }
        _ => 1.0,
    };

    if totally_transparent {
        raw
    } else {
        raw.max(MIN_VISIBLE_ALPHA)
    }
}

// ---------------------------------------------------------------------------
// Glow
// ---------------------------------------------------------------------------

/// Head highlight driven by protective effects.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Glow {
    #[default]
    None,
    /// Invulnerable: the complement of the body colour.
    Complementary(Rgb),
    /// Shielded: neutral white.
    Neutral,
}

impl Glow {
    pub fn color(self) -> Option<Rgb> {
        match self {
            Glow::None => None,
            Glow::Complementary(c) => Some(c),
            Glow::Neutral => Some(Rgb::WHITE),
        }
    }
}

// ---------------------------------------------------------------------------
// VisibilityRules
// ---------------------------------------------------------------------------

/// Effect names plus catalog durations, resolved once per join.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityRules {
    names: EffectNames,
    params: AlphaParams,
}

impl VisibilityRules {
    /// Resolve durations from `catalog`. The decay factor comes from the
    /// invisibility entry, falling back to `default_decay`.
    pub fn new(names: EffectNames, catalog: Option<&EffectCatalog>, default_decay: f64) -> Self {
        let spec = |name: &str| catalog.and_then(|c| c.get(name)).copied();
        let invisibility = spec(&names.invisibility);
        let fallback = if default_decay > 0.0 && default_decay.is_finite() {
            default_decay
        } else {
            CONTINUOUS_DECAY_FACTOR
        };
        let decay = invisibility.and_then(|s| s.decay).unwrap_or(fallback);

        if invisibility.is_some() && (decay - CONTINUOUS_DECAY_FACTOR).abs() > f64::EPSILON {
            warn!(
                decay,
                "invisibility decay factor differs from {CONTINUOUS_DECAY_FACTOR}, alpha will jump at D/F"
            );
        }

        let params = AlphaParams {
            reveal_duration: spec(&names.reveal).map(|s| s.duration),
            invisibility_duration: invisibility.map(|s| s.duration),
            decay,
        };
        Self { names, params }
    }

    pub fn names(&self) -> &EffectNames {
        &self.names
    }

    pub fn params(&self) -> AlphaParams {
        self.params
    }

    /// Alpha for a player with these remaining effect times.
    pub fn alpha(&self, times: &BTreeMap<String, f64>, totally_transparent: bool) -> f64 {
        let remaining = |name: &str| times.get(name).copied().unwrap_or(0.0);
        alpha(
            remaining(&self.names.reveal),
            remaining(&self.names.invisibility),
            self.params,
            totally_transparent,
        )
    }

    /// Invulnerability wins over a shield.
    pub fn glow(&self, times: &BTreeMap<String, f64>, color: Rgb) -> Glow {
        let active = |name: &str| times.get(name).is_some_and(|t| *t > 0.0);
        if active(&self.names.invulnerable) {
            Glow::Complementary(color.complement())
        } else if active(&self.names.shielded) {
            Glow::Neutral
        } else {
            Glow::None
        }
    }
}

impl Default for VisibilityRules {
    fn default() -> Self {
        Self::new(EffectNames::default(), None, CONTINUOUS_DECAY_FACTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const D: f64 = 10.0;

    fn params(decay: f64) -> AlphaParams {
        AlphaParams {
            reveal_duration: Some(2.0),
            invisibility_duration: Some(D),
            decay,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_remaining_beyond_duration_stays_opaque() {
        assert_eq!(alpha(0.0, D + 3.0, params(1.5), true), 1.0);
        assert_eq!(alpha(0.0, D * 10.0, params(1.5), false), 1.0);
    }

    #[test]
    fn test_no_effects_is_opaque() {
        assert_eq!(alpha(0.0, 0.0, params(1.5), false), 1.0);
        assert_eq!(alpha(0.0, 0.0, params(1.5), true), 1.0);
    }

    #[test]
    fn test_freshly_invisible_fades_out() {
        assert!(close(alpha(0.0, D, params(1.5), true), 1.0));
        assert!(close(alpha(0.0, 9.0, params(1.5), true), 1.0 - 1.0 * 1.5 / D));
    }

    #[test]
    fn test_alpha_continuous_at_threshold() {
        let f = CONTINUOUS_DECAY_FACTOR;
        let threshold = D / f;
        let above = alpha(0.0, threshold + 1e-9, params(f), true);
        let at = alpha(0.0, threshold, params(f), true);
        assert!(close(above, 0.5), "above = {above}");
        assert!(close(at, 0.5), "at = {at}");
    }

    #[test]
    fn test_alpha_recovers_as_invisibility_ends() {
        assert!(close(alpha(0.0, 0.0 + 1e-12, params(1.5), true), 1.0));
        assert!(close(alpha(0.0, 5.0, params(1.5), true), 0.75));
    }

    #[test]
    fn test_clamp_only_for_non_transparent() {
        // invis = 4: raw = max(0, 1 - 6 * 3 / 10) = 0 with F = 3 (4 > 10/3).
        let raw = alpha(0.0, 4.0, params(3.0), true);
        assert_eq!(raw, 0.0);
        assert_eq!(alpha(0.0, 4.0, params(3.0), false), MIN_VISIBLE_ALPHA);
    }

    #[test]
    fn test_reveal_branch_not_clamped() {
        // reveal = R: 1 - 1 = 0, even for a clamped viewer.
        assert_eq!(alpha(2.0, 0.0, params(1.5), false), 0.0);
        assert!(close(alpha(0.5, 0.0, params(1.5), false), 0.75));
        // Reveal longer than R falls through to the invisibility rules.
        assert_eq!(alpha(3.0, 0.0, params(1.5), false), 1.0);
    }

    #[test]
    fn test_unknown_durations_are_opaque() {
        let none = AlphaParams {
            reveal_duration: None,
            invisibility_duration: None,
            decay: 1.5,
        };
        assert_eq!(alpha(1.0, 5.0, none, true), 1.0);
    }

    #[test]
    fn test_catalog_parse() {
        let catalog = EffectCatalog::from_value(&json!({
            "invisible": {"duration": 10, "decay": 2.0},
            "reveal": 3,
            "broken": {"decay": 1.0},
            "negative": {"duration": -1}
        }));
        assert_eq!(catalog.duration("invisible"), Some(10.0));
        assert_eq!(catalog.get("invisible").unwrap().decay, Some(2.0));
        assert_eq!(catalog.duration("reveal"), Some(3.0));
        assert!(catalog.get("broken").is_none());
        assert!(catalog.get("negative").is_none());
    }

    #[test]
    fn test_rules_take_decay_from_catalog() {
        let names = EffectNames::default();
        let mut catalog = EffectCatalog::default();
        catalog.insert(
            names.invisibility.clone(),
            EffectSpec {
                duration: 8.0,
                decay: Some(2.0),
            },
        );
        let rules = VisibilityRules::new(names.clone(), Some(&catalog), 1.5);
        assert_eq!(rules.params().decay, 2.0);
        assert_eq!(rules.params().invisibility_duration, Some(8.0));

        let fallback = VisibilityRules::new(names, None, 1.5);
        assert_eq!(fallback.params().decay, 1.5);
        assert_eq!(fallback.params().invisibility_duration, None);
    }

    #[test]
    fn test_glow_priority() {
        let rules = VisibilityRules::default();
        let color = Rgb::new(1.0, 0.0, 0.0);
        let mut times = BTreeMap::new();
        assert_eq!(rules.glow(&times, color), Glow::None);

        times.insert("shield".to_owned(), 2.0);
        assert_eq!(rules.glow(&times, color), Glow::Neutral);

        times.insert("invulnerable".to_owned(), 1.0);
        assert_eq!(
            rules.glow(&times, color),
            Glow::Complementary(Rgb::new(0.0, 1.0, 1.0))
        );

        times.insert("invulnerable".to_owned(), 0.0);
        assert_eq!(rules.glow(&times, color), Glow::Neutral);
    }
}
