//! Cross-entity links and their integrity rules
//!
//! A change request records its trigger as two nullable columns in the store
//! (`fk_deviation_record_id`, `fk_capa_record_id`). In memory the pair is an
//! [`OriginRef`], which cannot hold both at once.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::entity::EntityKind;
use crate::core::error::Result;
use crate::core::identity::RecordId;
use crate::core::store::ReferenceStore;
use crate::entities::change_request::ChangeRequest;

/// What a change request originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum OriginRef {
    Deviation(RecordId),
    Capa(RecordId),
    #[default]
    None,
}

impl OriginRef {
    /// Build from the two stored columns; both set is ambiguous
    pub fn from_columns(
        deviation: Option<RecordId>,
        capa: Option<RecordId>,
    ) -> Result<Self, RelationshipError> {
        match (deviation, capa) {
            (Some(deviation), Some(capa)) => {
                Err(RelationshipError::AmbiguousOrigin { deviation, capa })
            }
            (Some(deviation), None) => Ok(OriginRef::Deviation(deviation)),
            (None, Some(capa)) => Ok(OriginRef::Capa(capa)),
            (None, None) => Ok(OriginRef::None),
        }
    }

    pub fn deviation_id(&self) -> Option<RecordId> {
        match self {
            OriginRef::Deviation(id) => Some(*id),
            _ => None,
        }
    }

    pub fn capa_id(&self) -> Option<RecordId> {
        match self {
            OriginRef::Capa(id) => Some(*id),
            _ => None,
        }
    }

    /// The referenced entity, if any
    pub fn target(&self) -> Option<(EntityKind, RecordId)> {
        match self {
            OriginRef::Deviation(id) => Some((EntityKind::Deviation, *id)),
            OriginRef::Capa(id) => Some((EntityKind::Capa, *id)),
            OriginRef::None => None,
        }
    }
}

impl std::fmt::Display for OriginRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OriginRef::Deviation(id) => write!(f, "deviation {}", id),
            OriginRef::Capa(id) => write!(f, "CAPA {}", id),
            OriginRef::None => write!(f, "none"),
        }
    }
}

/// Referential integrity failures
#[derive(Debug, Error)]
pub enum RelationshipError {
    #[error("A change request originates from one trigger; got deviation {deviation} and CAPA {capa}")]
    AmbiguousOrigin { deviation: RecordId, capa: RecordId },

    #[error("{entity} {id} does not exist")]
    DanglingReference { entity: EntityKind, id: RecordId },
}

/// Validates links against the store before they are written
pub struct RelationshipResolver<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: ReferenceStore + ?Sized> RelationshipResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Fail with `DanglingReference` unless `id` names a stored `entity`
    pub fn require(&self, entity: EntityKind, id: RecordId) -> Result<()> {
        if self.store.exists(entity, id)? {
            Ok(())
        } else {
            Err(RelationshipError::DanglingReference { entity, id }.into())
        }
    }

    /// Turn an optional (deviation, CAPA) pair into a checked origin
    pub fn resolve(&self, deviation: Option<RecordId>, capa: Option<RecordId>) -> Result<OriginRef> {
        let origin = OriginRef::from_columns(deviation, capa)?;
        if let Some((entity, id)) = origin.target() {
            self.require(entity, id)?;
        }
        Ok(origin)
    }

    /// Point `request` at its trigger. Nothing is written.
    pub fn attach(
        &self,
        request: &mut ChangeRequest,
        deviation: Option<RecordId>,
        capa: Option<RecordId>,
    ) -> Result<()> {
        request.origin = self.resolve(deviation, capa)?;
        Ok(())
    }
}

/// Read side: the trigger a change request points at
pub fn resolve_origin(request: &ChangeRequest) -> OriginRef {
    request.origin
}
