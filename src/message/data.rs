use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Dynamically typed value exchanged with peers and held in stores.
///
/// `Data` is totally ordered (reals compare with `f64::total_cmp`) so it can
/// key ordered maps on both the store and the table side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Data {
    #[default]
    None,
    Boolean(bool),
    Count(u64),
    Integer(i64),
    Real(f64),
    String(String),
    Vector(Vec<Data>),
    Table(BTreeMap<Data, Data>),
}

impl Data {
    fn rank(&self) -> u8 {
        match self {
            Data::None => 0,
            Data::Boolean(_) => 1,
            Data::Count(_) => 2,
            Data::Integer(_) => 3,
            Data::Real(_) => 4,
            Data::String(_) => 5,
            Data::Vector(_) => 6,
            Data::Table(_) => 7,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Data::None)
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            Data::Count(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Data::Real(r) => Some(*r),
            Data::Count(c) => Some(*c as f64),
            Data::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Data::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[Data]> {
        match self {
            Data::Vector(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Data::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_vector(self) -> Option<Vec<Data>> {
        match self {
            Data::Vector(v) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for Data {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Data {}

impl PartialOrd for Data {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Data {
    fn cmp(
        &self,
        other: &Self,
    ) -> Ordering {
        match (self, other) {
            (Data::None, Data::None) => Ordering::Equal,
            (Data::Boolean(a), Data::Boolean(b)) => a.cmp(b),
            (Data::Count(a), Data::Count(b)) => a.cmp(b),
            (Data::Integer(a), Data::Integer(b)) => a.cmp(b),
            (Data::Real(a), Data::Real(b)) => a.total_cmp(b),
            (Data::String(a), Data::String(b)) => a.cmp(b),
            (Data::Vector(a), Data::Vector(b)) => a.cmp(b),
            (Data::Table(a), Data::Table(b)) => a.iter().cmp(b.iter()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for Data {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Data::None => write!(f, "nil"),
            Data::Boolean(b) => write!(f, "{b}"),
            Data::Count(c) => write!(f, "{c}"),
            Data::Integer(i) => write!(f, "{i}"),
            Data::Real(r) => write!(f, "{r}"),
            Data::String(s) => write!(f, "{s:?}"),
            Data::Vector(v) => {
                write!(f, "(")?;
                for (i, d) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{d}")?;
                }
                write!(f, ")")
            }
            Data::Table(t) => {
                write!(f, "{{")?;
                for (i, (k, v)) in t.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} -> {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Data {
    fn from(v: bool) -> Self {
        Data::Boolean(v)
    }
}

impl From<u64> for Data {
    fn from(v: u64) -> Self {
        Data::Count(v)
    }
}

impl From<i64> for Data {
    fn from(v: i64) -> Self {
        Data::Integer(v)
    }
}

impl From<f64> for Data {
    fn from(v: f64) -> Self {
        Data::Real(v)
    }
}

impl From<&str> for Data {
    fn from(v: &str) -> Self {
        Data::String(v.to_string())
    }
}

impl From<String> for Data {
    fn from(v: String) -> Self {
        Data::String(v)
    }
}

impl From<Vec<Data>> for Data {
    fn from(v: Vec<Data>) -> Self {
        Data::Vector(v)
    }
}
