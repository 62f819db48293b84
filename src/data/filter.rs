use serde::{Deserialize, Serialize};

use super::model::{Decomposition, FittedComponent};

// ---------------------------------------------------------------------------
// Component selection: which Gaussian drives a pixel's correction
// ---------------------------------------------------------------------------

/// How to pick one component when a pixel has several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    /// Largest amplitude.
    #[default]
    Strongest,
    /// First component as reported by the decomposer.
    First,
    /// Centroid closest to a reference value.
    Nearest,
}

impl std::str::FromStr for Selection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strongest" => Ok(Selection::Strongest),
            "first" => Ok(Selection::First),
            "nearest" => Ok(Selection::Nearest),
            other => Err(format!(
                "unknown selection '{other}' (strongest, first, nearest)"
            )),
        }
    }
}

/// Selection rule plus the thresholds that make a component eligible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentFilter {
    pub selection: Selection,
    /// Centroid to compare against for [`Selection::Nearest`], decomposer units.
    pub reference: Option<f64>,
    /// Components with a smaller amplitude are ignored.
    pub min_amplitude: f64,
}

impl Default for ComponentFilter {
    fn default() -> Self {
        Self {
            selection: Selection::Strongest,
            reference: None,
            min_amplitude: 0.0,
        }
    }
}

impl ComponentFilter {
    /// Pick the component for one pixel, or `None` when nothing qualifies.
    ///
    /// A component qualifies when all three fit values are finite and the
    /// amplitude reaches `min_amplitude`. `Nearest` without a reference
    /// falls back to `Strongest`.
    pub fn select<'a>(&self, components: &'a [FittedComponent]) -> Option<&'a FittedComponent> {
        let mut eligible = components.iter().filter(|c| {
            c.amplitude.is_finite()
                && c.fwhm.is_finite()
                && c.mean.is_finite()
                && c.amplitude >= self.min_amplitude
        });

        match (self.selection, self.reference) {
            (Selection::First, _) => eligible.next(),
            (Selection::Nearest, Some(reference)) => eligible.min_by(|a, b| {
                (a.mean - reference)
                    .abs()
                    .total_cmp(&(b.mean - reference).abs())
            }),
            (Selection::Strongest, _) | (Selection::Nearest, None) => {
                eligible.max_by(|a, b| a.amplitude.total_cmp(&b.amplitude))
            }
        }
    }

    /// Selected centroid for every spectrum of `decomposition`, by index.
    pub fn centroids(&self, decomposition: &Decomposition) -> Vec<Option<f64>> {
        decomposition
            .components
            .iter()
            .map(|comps| self.select(comps).map(|c| c.mean))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comp(amplitude: f64, mean: f64) -> FittedComponent {
        FittedComponent {
            amplitude,
            fwhm: 1.0,
            mean,
        }
    }

    #[test]
    fn strongest_picks_largest_amplitude() {
        let comps = [comp(0.5, 1.0), comp(2.0, 5.0), comp(1.0, 3.0)];
        let f = ComponentFilter::default();
        assert_eq!(f.select(&comps).map(|c| c.mean), Some(5.0));
    }

    #[test]
    fn nearest_uses_reference() {
        let comps = [comp(0.5, 1.0), comp(2.0, 5.0), comp(1.0, 3.0)];
        let f = ComponentFilter {
            selection: Selection::Nearest,
            reference: Some(2.6),
            ..ComponentFilter::default()
        };
        assert_eq!(f.select(&comps).map(|c| c.mean), Some(3.0));
    }

    #[test]
    fn threshold_and_non_finite_values_exclude() {
        let comps = [comp(0.2, 1.0), comp(f64::NAN, 2.0), comp(0.9, 3.0)];
        let f = ComponentFilter {
            selection: Selection::First,
            min_amplitude: 0.5,
            ..ComponentFilter::default()
        };
        assert_eq!(f.select(&comps).map(|c| c.mean), Some(3.0));

        let strict = ComponentFilter {
            min_amplitude: 1.0,
            ..f
        };
        assert!(strict.select(&comps).is_none());
    }

    #[test]
    fn centroids_keep_spectrum_order() {
        let decomposition = Decomposition {
            components: vec![vec![comp(1.0, 4.0)], vec![], vec![comp(1.0, 6.0), comp(3.0, 7.0)]],
        };
        let centroids = ComponentFilter::default().centroids(&decomposition);
        assert_eq!(centroids, vec![Some(4.0), None, Some(7.0)]);
    }
}
