//! Intra-workspace duplicate detection.
//!
//! Patients are vertices; two patients are connected when they share enough
//! identity attributes to be classified into a [`ConflictCategory`]. Each
//! connected component with more than one member is a [`PatientCluster`].

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use clinic_patients::Patient;

use crate::error::MergeError;
use crate::plan::{Planner, plan_list};

/// How strongly two patient records look like the same person.
///
/// Variants are declared in rank order, so `Ord` sorts the most severe
/// category first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConflictCategory {
    #[serde(rename = "Duplicate Accounts")]
    DuplicateAccounts,
    #[serde(rename = "Likely Duplicate Accounts")]
    LikelyDuplicateAccounts,
    #[serde(rename = "MRN Only Match")]
    MrnOnlyMatch,
    #[serde(rename = "Name Only Match")]
    NameOnlyMatch,
}

impl ConflictCategory {
    pub const ALL: [ConflictCategory; 4] = [
        ConflictCategory::DuplicateAccounts,
        ConflictCategory::LikelyDuplicateAccounts,
        ConflictCategory::MrnOnlyMatch,
        ConflictCategory::NameOnlyMatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictCategory::DuplicateAccounts => "Duplicate Accounts",
            ConflictCategory::LikelyDuplicateAccounts => "Likely Duplicate Accounts",
            ConflictCategory::MrnOnlyMatch => "MRN Only Match",
            ConflictCategory::NameOnlyMatch => "Name Only Match",
        }
    }

    /// Classify a pair of records from the attributes they share.
    ///
    /// A shared birth date alone is not reported.
    pub fn classify(shared: &BTreeSet<PatientAttribute>) -> Option<Self> {
        if shared.contains(&PatientAttribute::AccountId) {
            return Some(ConflictCategory::DuplicateAccounts);
        }
        if shared.len() > 1 {
            return Some(ConflictCategory::LikelyDuplicateAccounts);
        }
        match shared.first() {
            Some(PatientAttribute::Mrn) => Some(ConflictCategory::MrnOnlyMatch),
            Some(PatientAttribute::FullName) => Some(ConflictCategory::NameOnlyMatch),
            _ => None,
        }
    }
}

impl core::fmt::Display for ConflictCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity attribute used for duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatientAttribute {
    #[serde(rename = "USER_ID")]
    AccountId,
    Mrn,
    FullName,
    #[serde(rename = "DOB")]
    BirthDate,
}

impl PatientAttribute {
    pub const ALL: [PatientAttribute; 4] = [
        PatientAttribute::AccountId,
        PatientAttribute::Mrn,
        PatientAttribute::FullName,
        PatientAttribute::BirthDate,
    ];

    /// Comparable value of the attribute, `None` when absent or blank.
    ///
    /// MRNs and names are compared case-insensitively, ignoring surrounding
    /// whitespace.
    pub fn value(&self, patient: &Patient) -> Option<String> {
        let value = match self {
            PatientAttribute::AccountId => patient.account_id.as_ref().map(|a| a.as_str().to_string()),
            PatientAttribute::Mrn => patient.mrn.as_deref().map(normalize),
            PatientAttribute::FullName => patient.full_name.as_deref().map(normalize),
            PatientAttribute::BirthDate => patient.birth_date.map(|d| d.to_string()),
        };
        value.filter(|v| !v.is_empty())
    }

    /// Attributes `a` and `b` have in common.
    pub fn shared(a: &Patient, b: &Patient) -> BTreeSet<PatientAttribute> {
        Self::ALL
            .into_iter()
            .filter(|attr| match (attr.value(a), attr.value(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            })
            .collect()
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Stable graph key of a patient: the account id, or the record id for
/// unclaimed records.
pub fn patient_key(patient: &Patient) -> String {
    match &patient.account_id {
        Some(account_id) => account_id.as_str().to_string(),
        None => patient.id.to_string(),
    }
}

/// One member of a cluster with the keys of its neighbors per category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientConflicts {
    pub patient: Patient,
    pub conflicts: BTreeMap<ConflictCategory, Vec<String>>,
}

impl PatientConflicts {
    pub fn count(&self, category: ConflictCategory) -> usize {
        self.conflicts.get(&category).map_or(0, Vec::len)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientCluster {
    pub patients: Vec<PatientConflicts>,
}

impl PatientCluster {
    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.patients.iter().map(|p| patient_key(&p.patient)).collect()
    }
}

plan_list!(
    /// Duplicate clusters found in one workspace.
    PatientClusters,
    PatientCluster
);

/// Undirected graph over a roster, one vertex per patient.
struct PatientGraph<'a> {
    patients: &'a [Patient],
    keys: Vec<String>,
    adjacency: Vec<BTreeMap<usize, ConflictCategory>>,
}

impl<'a> PatientGraph<'a> {
    fn build(patients: &'a [Patient]) -> Self {
        let keys: Vec<String> = patients.iter().map(patient_key).collect();

        let mut groups: HashMap<(PatientAttribute, String), Vec<usize>> = HashMap::new();
        for (idx, patient) in patients.iter().enumerate() {
            for attr in PatientAttribute::ALL {
                if let Some(value) = attr.value(patient) {
                    groups.entry((attr, value)).or_default().push(idx);
                }
            }
        }

        let mut shared: Vec<BTreeMap<usize, BTreeSet<PatientAttribute>>> = vec![BTreeMap::new(); patients.len()];
        for ((attr, _), members) in &groups {
            if members.len() < 2 {
                continue;
            }
            for &a in members {
                for &b in members.iter().filter(|&&b| b != a) {
                    shared[a].entry(b).or_default().insert(*attr);
                }
            }
        }

        let adjacency = shared
            .into_iter()
            .map(|neighbors| {
                neighbors
                    .into_iter()
                    .filter_map(|(n, attrs)| ConflictCategory::classify(&attrs).map(|c| (n, c)))
                    .collect()
            })
            .collect();

        Self {
            patients,
            keys,
            adjacency,
        }
    }

    fn components(&self) -> Vec<Vec<usize>> {
        let mut visited = vec![false; self.patients.len()];
        let mut components = Vec::new();

        for start in 0..self.patients.len() {
            if visited[start] {
                continue;
            }
            visited[start] = true;

            let mut component = Vec::new();
            let mut queue = VecDeque::from([start]);
            while let Some(vertex) = queue.pop_front() {
                component.push(vertex);
                for &neighbor in self.adjacency[vertex].keys() {
                    if !visited[neighbor] {
                        visited[neighbor] = true;
                        queue.push_back(neighbor);
                    }
                }
            }
            components.push(component);
        }

        components
    }

    fn conflicts_of(&self, vertex: usize) -> PatientConflicts {
        let mut conflicts: BTreeMap<ConflictCategory, Vec<String>> = BTreeMap::new();
        for (&neighbor, &category) in &self.adjacency[vertex] {
            conflicts.entry(category).or_default().push(self.keys[neighbor].clone());
        }
        for keys in conflicts.values_mut() {
            keys.sort();
        }

        PatientConflicts {
            patient: self.patients[vertex].clone(),
            conflicts,
        }
    }
}

/// Partitions a single workspace roster into duplicate clusters.
pub struct PatientClusterReporter<'a> {
    patients: &'a [Patient],
}

impl<'a> PatientClusterReporter<'a> {
    pub fn new(patients: &'a [Patient]) -> Self {
        Self { patients }
    }
}

impl Planner for PatientClusterReporter<'_> {
    type Output = PatientClusters;

    fn plan(&self) -> Result<PatientClusters, MergeError> {
        let graph = PatientGraph::build(self.patients);
        Ok(graph
            .components()
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| PatientCluster {
                patients: component.into_iter().map(|v| graph.conflicts_of(v)).collect(),
            })
            .collect())
    }
}
