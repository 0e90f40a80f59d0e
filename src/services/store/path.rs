use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::{Error, Result};

/// Slash separated path to a collection, `users` or `students/s1/conversations`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

/// A collection path plus the id of one document in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    collection: CollectionPath,
    id: String,
}

pub(crate) fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') || id == "." || id == ".." {
        return Err(Error::InvalidPath(format!("bad document id {id:?}")));
    }

    Ok(())
}

impl CollectionPath {
    pub fn parse(path: &str) -> Result<Self> {
        let segments = path.split('/').collect::<Vec<_>>();

        if segments.len() % 2 == 0 {
            return Err(Error::InvalidPath(format!(
                "{path:?} has an even number of segments"
            )));
        }

        for segment in &segments {
            validate_id(segment)
                .map_err(|_| Error::InvalidPath(format!("{path:?} has an empty or bad segment")))?;
        }

        Ok(Self(path.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment, the collection id within its parent.
    pub fn collection_id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Owning document of a sub-collection, `None` for root collections.
    pub fn parent(&self) -> Option<DocumentPath> {
        let (parent, _) = self.0.rsplit_once('/')?;
        let (collection, id) = parent.rsplit_once('/')?;

        Some(DocumentPath {
            collection: CollectionPath(collection.to_owned()),
            id: id.to_owned(),
        })
    }

    pub fn doc(&self, id: &str) -> Result<DocumentPath> {
        validate_id(id)?;

        Ok(DocumentPath {
            collection: self.clone(),
            id: id.to_owned(),
        })
    }
}

impl DocumentPath {
    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn child(&self, collection_id: &str) -> Result<CollectionPath> {
        validate_id(collection_id)?;
        Ok(CollectionPath(format!("{self}/{collection_id}")))
    }
}

impl FromStr for CollectionPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for CollectionPath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<String> for CollectionPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl Display for CollectionPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Display for DocumentPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}
