//! Flat parameter layout: `[mu, theta_norm..., theta_shape...]`.

use crate::nuisance::NuisanceRegistry;

/// Index of the signal strength in every parameter vector.
pub const POI_INDEX: usize = 0;

/// Name↔index mapping, rebuilt from the registry before each fit or scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterLayout {
    names: Vec<String>,
    n_norm: usize,
}

impl ParameterLayout {
    /// Build from the current registry contents. Registration order fixes indices.
    pub fn build(registry: &NuisanceRegistry) -> Self {
        let n = 1 + registry.len();
        let mut names = Vec::with_capacity(n);

        names.push("mu".to_string());
        for nn in registry.norm() {
            names.push(format!("theta_norm_{}", nn.name()));
        }
        for sn in registry.shape() {
            names.push(format!("theta_shape_{}", sn.name()));
        }

        Self { names, n_norm: registry.norm().len() }
    }

    /// Total number of parameters (`1 + nuisances`).
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false: `mu` is always present.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Parameter names in index order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Index of a parameter by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Parameter index of the `i`-th norm nuisance.
    pub fn norm_index(&self, i: usize) -> usize {
        1 + i
    }

    /// Parameter index of the `i`-th shape nuisance.
    pub fn shape_index(&self, i: usize) -> usize {
        1 + self.n_norm + i
    }
}
