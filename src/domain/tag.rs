use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// How a set of tag ids is applied to a post's existing associations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagSync {
    /// Associations become exactly the given set.
    Replace,
    /// Given ids are added; existing associations stay.
    Append,
    /// Given ids are removed; ids that are not attached are ignored.
    Detach,
}
