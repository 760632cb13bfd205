//! Personnel - staff members CAPA records are assigned to

use serde::{Deserialize, Serialize};

use crate::core::identity::RecordId;

/// A stored staff member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Personnel {
    pub id: RecordId,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A staff member that has not been stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPersonnel {
    pub name: String,
    pub email: Option<String>,
}
