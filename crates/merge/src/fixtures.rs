//! Deterministic random workspaces for tests, benchmarks and CLI demos.
//!
//! Every generated patient starts with attributes unique across the whole
//! data set; duplicates are then produced by copying selected attributes from
//! a base patient, so the expected conflicts are known exactly.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use clinic_clinicians::{Clinician, Role};
use clinic_core::AccountId;
use clinic_infra::StoreSnapshot;
use clinic_patients::{Patient, PatientSummary, Permissions};
use clinic_workspace::{Clinic, PatientTag, Site};

const FIRST_NAMES: &[&str] = &[
    "Ada", "Ben", "Cora", "Dev", "Elena", "Farid", "Greta", "Hugo", "Ines", "Jonas", "Kira", "Luis",
    "Maya", "Nils", "Olga", "Pavel", "Quinn", "Rosa", "Sami", "Tara",
];
const LAST_NAMES: &[&str] = &[
    "Adler", "Baker", "Chen", "Diaz", "Evans", "Fischer", "Garcia", "Haddad", "Ito", "Jensen",
    "Kowalski", "Lopez", "Moreau", "Novak", "Okafor", "Petrov", "Quint", "Rossi", "Silva", "Tanaka",
];
const TAG_NAMES: &[&str] = &[
    "T1D", "T2D", "Pump", "CGM", "Pediatric", "Adult", "Research", "Follow Up", "New Onset", "Remote",
];
const SITE_NAMES: &[&str] = &[
    "Downtown", "Northside", "Riverside", "Lakeview", "Hillcrest", "Harbor", "Eastgate", "Westfield",
];

/// Shape of a source/target pair for end-to-end merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    pub source_patients: usize,
    pub target_patients: usize,
    /// Target patients sharing a source patient's account.
    pub duplicate_accounts: usize,
    /// Target patients sharing two of name, birth date and MRN.
    pub likely_duplicates: usize,
    pub name_only_matches: usize,
    pub mrn_only_matches: usize,
    pub seed: u64,
}

impl Params {
    pub fn duplicates(&self) -> usize {
        self.duplicate_accounts + self.likely_duplicates + self.name_only_matches + self.mrn_only_matches
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            source_patients: 50,
            target_patients: 50,
            duplicate_accounts: 10,
            likely_duplicates: 9,
            name_only_matches: 8,
            mrn_only_matches: 7,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Data {
    pub source: Clinic,
    pub source_admin: Clinician,
    pub source_patients: Vec<Patient>,
    pub target: Clinic,
    pub target_admin: Clinician,
    pub target_patients: Vec<Patient>,
    /// Target records sharing an account with a source record, by account.
    pub target_patients_with_duplicates: BTreeMap<AccountId, Patient>,
}

impl Data {
    /// Store contents holding both workspaces.
    pub fn into_snapshot(self) -> StoreSnapshot {
        let mut patients = self.source_patients;
        patients.extend(self.target_patients);
        StoreSnapshot {
            clinics: vec![self.source, self.target],
            patients,
            clinicians: vec![self.source_admin, self.target_admin],
            plans: Vec::new(),
        }
    }
}

/// Shape of a single workspace seeded with duplicate clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterParams {
    pub clusters: usize,
    pub likely_duplicates: usize,
    pub name_only_matches: usize,
    pub mrn_only_matches: usize,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct ClusterData {
    pub clinic: Clinic,
    pub patients: Vec<Patient>,
    /// Expected cluster memberships, as patient keys.
    pub clusters: Vec<BTreeSet<String>>,
}

/// Which attributes a generated duplicate copies from its base patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Duplicate {
    Account,
    Likely,
    NameOnly,
    MrnOnly,
}

struct Generator {
    rng: StdRng,
    names: HashSet<String>,
    mrns: HashSet<String>,
    birth_dates: HashSet<NaiveDate>,
    accounts: HashSet<String>,
}

impl Generator {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            names: HashSet::new(),
            mrns: HashSet::new(),
            birth_dates: HashSet::new(),
            accounts: HashSet::new(),
        }
    }

    fn unique<T: Clone + Eq + std::hash::Hash>(
        rng: &mut StdRng,
        seen: &mut HashSet<T>,
        mut generate: impl FnMut(&mut StdRng) -> T,
    ) -> T {
        loop {
            let value = generate(rng);
            if seen.insert(value.clone()) {
                return value;
            }
        }
    }

    fn full_name(&mut self) -> String {
        Self::unique(&mut self.rng, &mut self.names, |rng| {
            let first = FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())];
            let last = LAST_NAMES[rng.gen_range(0..LAST_NAMES.len())];
            let initial = char::from(b'A' + rng.gen_range(0..26u8));
            format!("{first} {initial}. {last}")
        })
    }

    fn mrn(&mut self) -> String {
        Self::unique(&mut self.rng, &mut self.mrns, |rng| format!("{:010}", rng.gen_range(0..10_000_000_000u64)))
    }

    fn birth_date(&mut self) -> NaiveDate {
        let epoch = NaiveDate::from_ymd_opt(1930, 1, 1).unwrap_or_default();
        Self::unique(&mut self.rng, &mut self.birth_dates, |rng| {
            epoch + Duration::days(rng.gen_range(0..365 * 90))
        })
    }

    fn account_id(&mut self) -> AccountId {
        let raw = Self::unique(&mut self.rng, &mut self.accounts, |rng| format!("{:032x}", rng.r#gen::<u128>()));
        AccountId::parse(raw).expect("generated account ids are never blank")
    }

    fn clinic(&mut self, name: &str) -> Clinic {
        let mut clinic = Clinic::new(name);

        let mut tags: Vec<&str> = TAG_NAMES.to_vec();
        tags.shuffle(&mut self.rng);
        let tag_count = self.rng.gen_range(3..=6);
        clinic.patient_tags = tags.into_iter().take(tag_count).map(PatientTag::new).collect();

        let mut sites: Vec<&str> = SITE_NAMES.to_vec();
        sites.shuffle(&mut self.rng);
        let site_count = self.rng.gen_range(1..=3);
        clinic.sites = sites.into_iter().take(site_count).map(Site::new).collect();

        clinic.share_codes = vec![self.share_code()];
        clinic.canonical_share_code = clinic.share_codes.first().cloned();
        clinic
    }

    fn share_code(&mut self) -> String {
        const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
        (0..12)
            .map(|i| {
                if i > 0 && i % 4 == 0 {
                    '-'
                } else {
                    char::from(ALPHABET[self.rng.gen_range(0..ALPHABET.len())])
                }
            })
            .collect()
    }

    fn admin(&mut self, clinic: &mut Clinic) -> Clinician {
        let account_id = self.account_id();
        clinic.admins.push(account_id.clone());
        let mut admin = Clinician::member(clinic.id, account_id, vec![Role::ClinicAdmin]);
        let name = self.full_name();
        admin.email = Some(format!("{}@example.org", name.to_lowercase().replace([' ', '.'], "")));
        admin.name = Some(name);
        admin
    }

    /// A patient with attributes unique across the generator's lifetime.
    fn patient(&mut self, clinic: &Clinic) -> Patient {
        let mut patient = Patient::new(clinic.id);
        patient.account_id = Some(self.account_id());
        patient.full_name = Some(self.full_name());
        patient.mrn = Some(self.mrn());
        patient.birth_date = Some(self.birth_date());

        if self.rng.gen_bool(0.2) {
            patient.permissions = Some(Permissions::custodial());
        }

        let tag_count = self.rng.gen_range(0..clinic.patient_tags.len().max(1));
        let mut tags: Vec<_> = clinic.patient_tags.iter().map(|t| t.id).collect();
        tags.shuffle(&mut self.rng);
        patient.tags = tags.into_iter().take(tag_count).collect();

        if let Some(site) = clinic.sites.choose(&mut self.rng) {
            patient.sites = vec![site.clone()];
        }

        if self.rng.gen_bool(0.8) {
            let offset = self.rng.gen_range(0..60 * 60 * 24 * 365);
            let last_upload = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().map(|t| t + Duration::seconds(offset));
            patient.summary = Some(PatientSummary {
                last_upload_date: last_upload,
                ..PatientSummary::default()
            });
        }

        patient
    }

    /// Copy the attributes that make `duplicate` match `base`.
    fn make_duplicate(&mut self, kind: Duplicate, base: &Patient, duplicate: &mut Patient) {
        match kind {
            Duplicate::Account => duplicate.account_id = base.account_id.clone(),
            Duplicate::NameOnly => duplicate.full_name = base.full_name.clone(),
            Duplicate::MrnOnly => duplicate.mrn = base.mrn.clone(),
            Duplicate::Likely => match self.rng.gen_range(0..3) {
                0 => {
                    duplicate.full_name = base.full_name.clone();
                    duplicate.birth_date = base.birth_date;
                }
                1 => {
                    duplicate.full_name = base.full_name.clone();
                    duplicate.mrn = base.mrn.clone();
                }
                _ => {
                    duplicate.birth_date = base.birth_date;
                    duplicate.mrn = base.mrn.clone();
                }
            },
        }
    }
}

/// Source and target workspaces with a known number of cross-workspace
/// conflicts.
///
/// The first `duplicates()` source patients each get exactly one matching
/// target patient; all other patients are unique. Both clinics carry a site
/// with the same name so at least one site is renamed on merge.
pub fn random_data(params: Params) -> Data {
    assert!(
        params.duplicates() <= params.source_patients.min(params.target_patients),
        "more duplicates than patients"
    );

    let mut generator = Generator::new(params.seed);

    let mut source = generator.clinic("Source Clinic");
    let mut target = generator.clinic("Target Clinic");
    let source_admin = generator.admin(&mut source);
    let target_admin = generator.admin(&mut target);

    let shared_site = Site::new("Main Campus");
    source.sites.push(shared_site.clone());
    target.sites.push(Site::new(shared_site.name.clone()));

    let mut source_patients: Vec<Patient> = (0..params.source_patients).map(|_| generator.patient(&source)).collect();
    let mut target_patients: Vec<Patient> = (0..params.target_patients - params.duplicates())
        .map(|_| generator.patient(&target))
        .collect();

    let kinds = std::iter::repeat_n(Duplicate::Account, params.duplicate_accounts)
        .chain(std::iter::repeat_n(Duplicate::Likely, params.likely_duplicates))
        .chain(std::iter::repeat_n(Duplicate::NameOnly, params.name_only_matches))
        .chain(std::iter::repeat_n(Duplicate::MrnOnly, params.mrn_only_matches));

    let mut target_patients_with_duplicates = BTreeMap::new();
    for (i, kind) in kinds.enumerate() {
        let mut duplicate = generator.patient(&target);
        generator.make_duplicate(kind, &source_patients[i], &mut duplicate);

        if kind == Duplicate::Account {
            if i == 0 {
                source_patients[i].sites.push(shared_site.clone());
                if let Some(target_site) = target.sites.last() {
                    duplicate.sites.push(target_site.clone());
                }
            } else if i == 1 {
                source_patients[i].sites.clear();
                duplicate.sites.clear();
            }
            if let Some(account_id) = &duplicate.account_id {
                target_patients_with_duplicates.insert(account_id.clone(), duplicate.clone());
            }
        }
        target_patients.push(duplicate);
    }

    for site in source.sites.iter_mut() {
        site.patients = source_patients.iter().filter(|p| p.has_site(site)).count() as u64;
    }
    for site in target.sites.iter_mut() {
        site.patients = target_patients.iter().filter(|p| p.has_site(site)).count() as u64;
    }
    source.patient_count = source_patients.len() as u64;
    target.patient_count = target_patients.len() as u64;

    Data {
        source,
        source_admin,
        source_patients,
        target,
        target_admin,
        target_patients,
        target_patients_with_duplicates,
    }
}

/// One workspace whose roster forms `clusters` disjoint duplicate groups.
pub fn random_data_for_clustering(params: ClusterParams) -> ClusterData {
    let mut generator = Generator::new(params.seed);
    let clinic = generator.clinic("Cluster Clinic");

    let mut patients = Vec::new();
    let mut clusters = Vec::with_capacity(params.clusters);

    let kinds: Vec<Duplicate> = std::iter::repeat_n(Duplicate::Likely, params.likely_duplicates)
        .chain(std::iter::repeat_n(Duplicate::NameOnly, params.name_only_matches))
        .chain(std::iter::repeat_n(Duplicate::MrnOnly, params.mrn_only_matches))
        .collect();

    for _ in 0..params.clusters {
        let base = generator.patient(&clinic);
        let mut keys = BTreeSet::new();
        keys.insert(crate::cluster::patient_key(&base));

        for &kind in &kinds {
            let mut duplicate = generator.patient(&clinic);
            generator.make_duplicate(kind, &base, &mut duplicate);
            keys.insert(crate::cluster::patient_key(&duplicate));
            patients.push(duplicate);
        }

        patients.push(base);
        clusters.push(keys);
    }

    ClusterData {
        clinic,
        patients,
        clusters,
    }
}
