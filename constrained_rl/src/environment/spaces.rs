//! Observation and action space descriptors.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Space {
    /// Bounded real vector.
    Box { low: f32, high: f32, shape: Vec<usize> },
    /// `n` discrete choices.
    Discrete(usize),
}

impl Space {
    /// One-dimensional box of size `dim`.
    pub fn boxed(low: f32, high: f32, dim: usize) -> Self {
        Self::Box {
            low,
            high,
            shape: vec![dim],
        }
    }

    /// Number of scalars in one flat sample.
    pub fn flat_dim(&self) -> usize {
        match self {
            Self::Box { shape, .. } => shape.iter().product(),
            Self::Discrete(_) => 1,
        }
    }

    pub fn contains(&self, sample: &[f32]) -> bool {
        match self {
            Self::Box { low, high, .. } => {
                sample.len() == self.flat_dim() && sample.iter().all(|x| (*low..=*high).contains(x))
            }
            Self::Discrete(n) => {
                sample.len() == 1 && sample[0] >= 0.0 && (sample[0] as usize) < *n && sample[0].fract() == 0.0
            }
        }
    }
}

/// Per-agent spaces of one environment. All agents share the same spaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvSpaces {
    pub observation: Space,
    pub shared_observation: Space,
    pub action: Space,
}

impl EnvSpaces {
    pub fn obs_size(&self) -> usize {
        self.observation.flat_dim()
    }

    pub fn shared_obs_size(&self) -> usize {
        self.shared_observation.flat_dim()
    }

    pub fn action_dim(&self) -> usize {
        self.action.flat_dim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_dims_and_bounds() {
        let space = Space::Box {
            low: -1.0,
            high: 1.0,
            shape: vec![2, 3],
        };
        assert_eq!(space.flat_dim(), 6);
        assert!(space.contains(&[0.0; 6]));
        assert!(!space.contains(&[2.0, 0.0, 0.0, 0.0, 0.0, 0.0]));
        assert!(!space.contains(&[0.0; 5]));
    }

    #[test]
    fn test_discrete() {
        let space = Space::Discrete(3);
        assert_eq!(space.flat_dim(), 1);
        assert!(space.contains(&[2.0]));
        assert!(!space.contains(&[3.0]));
        assert!(!space.contains(&[0.5]));
    }

    #[test]
    fn test_spaces_serde() {
        let spaces = EnvSpaces {
            observation: Space::boxed(-10.0, 10.0, 4),
            shared_observation: Space::boxed(-10.0, 10.0, 3),
            action: Space::boxed(-1.0, 1.0, 2),
        };
        let json = serde_json::to_string(&spaces).unwrap();
        let back: EnvSpaces = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spaces);
        assert_eq!((back.obs_size(), back.shared_obs_size(), back.action_dim()), (4, 3, 2));
    }
}
