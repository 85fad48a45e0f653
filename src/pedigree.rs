//! Families and their members.
//!
//! Pedigrees are loaded by an external collaborator.
//! This module only defines what the variant model needs from them: ordered members with role, sex, affected status, and parent links.
//! Roles, sexes, and statuses are bit flags, as the store keeps the union over all carriers of an allele in a single integer column.

use crate::filter::BitFlag;

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;


//-----------------------------------------------------------------------------

/// Role of a person in the family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Proband,
    Sibling,
    Mother,
    Father,
    MaternalGrandmother,
    MaternalGrandfather,
    PaternalGrandmother,
    PaternalGrandfather,
    Child,
    Spouse,
    Unknown,
}

impl Role {
    const ALL: [Role; 11] = [
        Role::Proband, Role::Sibling, Role::Mother, Role::Father,
        Role::MaternalGrandmother, Role::MaternalGrandfather,
        Role::PaternalGrandmother, Role::PaternalGrandfather,
        Role::Child, Role::Spouse, Role::Unknown,
    ];

    /// Returns the short name used in pedigree files and filters.
    pub fn name(self) -> &'static str {
        match self {
            Role::Proband => "prb",
            Role::Sibling => "sib",
            Role::Mother => "mom",
            Role::Father => "dad",
            Role::MaternalGrandmother => "maternal_grandmother",
            Role::MaternalGrandfather => "maternal_grandfather",
            Role::PaternalGrandmother => "paternal_grandmother",
            Role::PaternalGrandfather => "paternal_grandfather",
            Role::Child => "child",
            Role::Spouse => "spouse",
            Role::Unknown => "unknown",
        }
    }

    /// Returns the role corresponding to the bit value, if the value is a single known bit.
    pub fn from_bit(bit: u64) -> Option<Self> {
        Self::ALL.iter().copied().find(|role| role.bit() == bit)
    }
}

impl BitFlag for Role {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "prb" | "proband" => Some(Role::Proband),
            "sib" | "sibling" => Some(Role::Sibling),
            "mom" | "mother" => Some(Role::Mother),
            "dad" | "father" => Some(Role::Father),
            "maternal_grandmother" => Some(Role::MaternalGrandmother),
            "maternal_grandfather" => Some(Role::MaternalGrandfather),
            "paternal_grandmother" => Some(Role::PaternalGrandmother),
            "paternal_grandfather" => Some(Role::PaternalGrandfather),
            "child" => Some(Role::Child),
            "spouse" => Some(Role::Spouse),
            "unknown" => Some(Role::Unknown),
            _ => None,
        }
    }

    fn bit(self) -> u64 {
        1 << (self as u64)
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

//-----------------------------------------------------------------------------

/// Sex of a person.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Sex {
    Male,
    Female,
    Unspecified,
}

impl Sex {
    /// Returns the sex corresponding to the bit value.
    pub fn from_bit(bit: u64) -> Option<Self> {
        [Sex::Male, Sex::Female, Sex::Unspecified].into_iter().find(|sex| sex.bit() == bit)
    }
}

impl BitFlag for Sex {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "m" | "male" | "1" => Some(Sex::Male),
            "f" | "female" | "2" => Some(Sex::Female),
            "u" | "unspecified" | "0" => Some(Sex::Unspecified),
            _ => None,
        }
    }

    fn bit(self) -> u64 {
        match self {
            Sex::Male => 1,
            Sex::Female => 2,
            Sex::Unspecified => 4,
        }
    }
}

impl Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sex::Male => write!(f, "M"),
            Sex::Female => write!(f, "F"),
            Sex::Unspecified => write!(f, "U"),
        }
    }
}

//-----------------------------------------------------------------------------

/// Affected status of a person.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    Unaffected,
    Affected,
    Unspecified,
}

impl Status {
    /// Returns the status corresponding to the bit value.
    pub fn from_bit(bit: u64) -> Option<Self> {
        [Status::Unaffected, Status::Affected, Status::Unspecified].into_iter().find(|status| status.bit() == bit)
    }
}

impl BitFlag for Status {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "unaffected" | "1" => Some(Status::Unaffected),
            "affected" | "2" => Some(Status::Affected),
            "unspecified" | "0" | "-9" => Some(Status::Unspecified),
            _ => None,
        }
    }

    fn bit(self) -> u64 {
        match self {
            Status::Unaffected => 1,
            Status::Affected => 2,
            Status::Unspecified => 4,
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Unaffected => write!(f, "unaffected"),
            Status::Affected => write!(f, "affected"),
            Status::Unspecified => write!(f, "unspecified"),
        }
    }
}

//-----------------------------------------------------------------------------

/// A member of a family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Person {
    pub person_id: String,
    pub family_id: String,
    pub mom_id: Option<String>,
    pub dad_id: Option<String>,
    pub sex: Sex,
    pub status: Status,
    pub role: Role,
}

impl Person {
    // Missing parent identifiers in pedigree files.
    const MISSING: [&'static str; 3] = ["", "0", "."];

    fn parent_id(field: &str) -> Option<String> {
        if Self::MISSING.contains(&field) {
            None
        } else {
            Some(field.to_string())
        }
    }

    /// Parses a tab-separated pedigree line.
    ///
    /// The fields are `familyId personId dadId momId sex status role`.
    /// Missing parents are `0`, `.`, or empty.
    pub fn from_ped_line(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        if fields.len() < 7 {
            return Err(format!("Expected 7 pedigree fields, found {}", fields.len()));
        }
        let sex = Sex::from_name(fields[4]).ok_or(format!("Invalid sex: {}", fields[4]))?;
        let status = Status::from_name(fields[5]).ok_or(format!("Invalid status: {}", fields[5]))?;
        let role = Role::from_name(fields[6]).ok_or(format!("Invalid role: {}", fields[6]))?;
        Ok(Person {
            family_id: fields[0].to_string(),
            person_id: fields[1].to_string(),
            dad_id: Self::parent_id(fields[2]),
            mom_id: Self::parent_id(fields[3]),
            sex, status, role,
        })
    }
}

//-----------------------------------------------------------------------------

/// A family with ordered members.
///
/// The order of the members defines the columns of genotype and best state matrices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Family {
    family_id: String,
    members: Vec<Person>,
    index: HashMap<String, usize>,
}

impl Family {
    /// Creates a family from members in matrix column order.
    ///
    /// Returns an error if the members disagree on the family or a person is listed twice.
    pub fn new(family_id: &str, members: Vec<Person>) -> Result<Self, String> {
        let mut index = HashMap::with_capacity(members.len());
        for (offset, person) in members.iter().enumerate() {
            if person.family_id != family_id {
                return Err(format!("Person {} belongs to family {}, not {}", person.person_id, person.family_id, family_id));
            }
            if index.insert(person.person_id.clone(), offset).is_some() {
                return Err(format!("Duplicate person {} in family {}", person.person_id, family_id));
            }
        }
        Ok(Family { family_id: family_id.to_string(), members, index })
    }

    /// Returns the family identifier.
    pub fn family_id(&self) -> &str {
        &self.family_id
    }

    /// Returns the members in matrix column order.
    pub fn members(&self) -> &[Person] {
        &self.members
    }

    /// Returns the number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if the family has no members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns the column index of the person.
    pub fn member_index(&self, person_id: &str) -> Option<usize> {
        self.index.get(person_id).copied()
    }

    /// Returns the column index of the mother of the given member, if she is in the family.
    pub fn mom_of(&self, member: usize) -> Option<usize> {
        self.members[member].mom_id.as_ref().and_then(|id| self.member_index(id))
    }

    /// Returns the column index of the father of the given member, if he is in the family.
    pub fn dad_of(&self, member: usize) -> Option<usize> {
        self.members[member].dad_id.as_ref().and_then(|id| self.member_index(id))
    }

    /// Returns `true` if neither parent of the member is in the family.
    pub fn is_founder(&self, member: usize) -> bool {
        self.mom_of(member).is_none() && self.dad_of(member).is_none()
    }
}

//-----------------------------------------------------------------------------

/// Lookup of families by identifier.
pub trait FamilyLookup: Send + Sync {
    /// Returns the family with the given identifier.
    fn family(&self, family_id: &str) -> Option<Arc<Family>>;
}

/// An in-memory collection of families.
#[derive(Clone, Debug, Default)]
pub struct FamilyRegistry {
    families: HashMap<String, Arc<Family>>,
}

impl FamilyRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a family, replacing any previous family with the same identifier.
    pub fn insert(&mut self, family: Family) -> Arc<Family> {
        let family = Arc::new(family);
        self.families.insert(family.family_id().to_string(), family.clone());
        family
    }

    /// Builds families from persons listed in column order.
    pub fn from_persons(persons: Vec<Person>) -> Result<Self, String> {
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<Person>> = HashMap::new();
        for person in persons {
            if !grouped.contains_key(&person.family_id) {
                order.push(person.family_id.clone());
            }
            grouped.entry(person.family_id.clone()).or_default().push(person);
        }

        let mut result = FamilyRegistry::new();
        for family_id in order {
            let members = grouped.remove(&family_id).unwrap_or_default();
            result.insert(Family::new(&family_id, members)?);
        }
        Ok(result)
    }

    /// Returns the number of families.
    pub fn len(&self) -> usize {
        self.families.len()
    }

    /// Returns `true` if there are no families.
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Returns an iterator over the families in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Family>> {
        self.families.values()
    }
}

impl FamilyLookup for FamilyRegistry {
    fn family(&self, family_id: &str) -> Option<Arc<Family>> {
        self.families.get(family_id).cloned()
    }
}

//-----------------------------------------------------------------------------
