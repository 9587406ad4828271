//! Module registration and activation-order resolution.
//!
//! The registry turns implicit "call AddX before AddY" ordering knowledge
//! into a checked invariant: each module declares the capabilities it
//! requires and provides, and [`CompositionRegistry::build_plan`] computes a
//! stable topological order over that graph. Modules with no ordering
//! constraint between them keep their registration order.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::descriptor::ModuleDescriptor;
use crate::error::{ComposeError, Result};

/// Ordered collection of module descriptors.
#[derive(Default)]
pub struct CompositionRegistry {
    descriptors: Vec<ModuleDescriptor>,
}

impl CompositionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor.
    ///
    /// Fails without mutating the registry when the module name is taken.
    pub fn register(&mut self, descriptor: ModuleDescriptor) -> Result<()> {
        if self.descriptors.iter().any(|d| d.name() == descriptor.name()) {
            return Err(ComposeError::DuplicateModule {
                name: descriptor.name().to_string(),
            });
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Compute the activation order.
    ///
    /// Pure graph computation: Kahn's algorithm over `requires` -> `provides`
    /// edges, always taking the lowest registration index among ready
    /// modules, so unconstrained modules activate in registration order.
    pub fn build_plan(&self) -> Result<ActivationPlan> {
        let count = self.descriptors.len();

        let mut providers: HashMap<&str, Vec<usize>> = HashMap::new();
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            for capability in descriptor.provided() {
                providers.entry(capability.as_str()).or_default().push(index);
            }
        }

        // dependents[p] lists modules ordered after p; indegree counts
        // unsatisfied provider edges per module.
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut indegree = vec![0usize; count];
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            for capability in descriptor.required() {
                let Some(sources) = providers.get(capability.as_str()) else {
                    return Err(ComposeError::UnsatisfiedDependency {
                        module: descriptor.name().to_string(),
                        capability: capability.clone(),
                    });
                };
                for &provider in sources {
                    // A module satisfying its own requirement adds no edge.
                    if provider == index {
                        continue;
                    }
                    dependents[provider].push(index);
                    indegree[index] += 1;
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        loop {
            let Some(index) = ready.iter().next().copied() else {
                break;
            };
            ready.remove(&index);
            order.push(index);
            for &dependent in &dependents[index] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != count {
            return Err(ComposeError::CyclicDependency {
                member: self.cycle_member(&indegree),
            });
        }

        Ok(ActivationPlan {
            modules: order
                .iter()
                .map(|&index| self.descriptors[index].clone())
                .collect(),
            registration: order,
        })
    }

    /// Walk unresolved provider edges until a module repeats; the repeated
    /// module genuinely sits on a cycle.
    fn cycle_member(&self, indegree: &[usize]) -> String {
        let remaining: HashSet<usize> = indegree
            .iter()
            .enumerate()
            .filter(|&(_, &degree)| degree > 0)
            .map(|(index, _)| index)
            .collect();
        let mut seen = HashSet::new();
        let mut current = match remaining.iter().min() {
            Some(&index) => index,
            None => return String::new(),
        };
        loop {
            if !seen.insert(current) {
                return self.descriptors[current].name().to_string();
            }
            let descriptor = &self.descriptors[current];
            let mut next = None;
            'search: for capability in descriptor.required() {
                for (index, candidate) in self.descriptors.iter().enumerate() {
                    if index != current
                        && remaining.contains(&index)
                        && candidate.provided().contains(capability)
                    {
                        next = Some(index);
                        break 'search;
                    }
                }
            }
            match next {
                Some(index) => current = index,
                None => return descriptor.name().to_string(),
            }
        }
    }
}

/// The validated activation order. Built once per composition, immutable
/// thereafter.
#[derive(Clone)]
pub struct ActivationPlan {
    modules: Vec<ModuleDescriptor>,
    /// Registration index of each module, parallel to `modules`. Pipeline
    /// stages tie-break on it.
    registration: Vec<usize>,
}

impl std::fmt::Debug for ActivationPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationPlan")
            .field(
                "modules",
                &self.modules.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("registration", &self.registration)
            .finish()
    }
}

impl ActivationPlan {
    pub fn iter(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.iter()
    }

    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    pub(crate) fn registration_index(&self, position: usize) -> usize {
        self.registration[position]
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|d| d.name()).collect()
    }
}
