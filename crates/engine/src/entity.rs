//! The closed set of entity kinds whose lifecycle is tracked.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::table::StateDefinition;

/// An entity kind. Each kind owns an independent transition table; state
/// names are private to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    #[serde(alias = "processo")]
    Process,
    #[serde(alias = "documento")]
    Document,
    Agenda,
    Pipeline,
    #[serde(alias = "financeiro")]
    Financial,
    #[serde(alias = "cliente")]
    Client,
    Insight,
}

impl EntityType {
    pub const ALL: [EntityType; 7] = [
        EntityType::Process,
        EntityType::Document,
        EntityType::Agenda,
        EntityType::Pipeline,
        EntityType::Financial,
        EntityType::Client,
        EntityType::Insight,
    ];

    /// Canonical tag, also the `entity_type` column value in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Process => "process",
            EntityType::Document => "document",
            EntityType::Agenda => "agenda",
            EntityType::Pipeline => "pipeline",
            EntityType::Financial => "financial",
            EntityType::Client => "client",
            EntityType::Insight => "insight",
        }
    }

    /// The built-in lifecycle for this kind.
    pub fn default_definition(self) -> StateDefinition {
        match self {
            EntityType::Process => StateDefinition::from_edges(
                &["ativo"],
                &[
                    ("ativo", &["suspenso", "concluido", "arquivado"]),
                    ("suspenso", &["ativo", "arquivado"]),
                    ("concluido", &["arquivado"]),
                    ("arquivado", &[]),
                ],
            ),
            EntityType::Document => StateDefinition::from_edges(
                &["draft"],
                &[
                    ("draft", &["review"]),
                    ("review", &["draft", "approved", "rejected"]),
                    ("approved", &["signed", "archived"]),
                    ("rejected", &["draft", "archived"]),
                    ("signed", &["archived"]),
                    ("archived", &[]),
                ],
            ),
            EntityType::Agenda => StateDefinition::from_edges(
                &["pendente"],
                &[("pendente", &["concluido"]), ("concluido", &[])],
            ),
            EntityType::Pipeline => StateDefinition::from_edges(
                &["new"],
                &[
                    ("new", &["contacted", "lost"]),
                    ("contacted", &["qualified", "lost"]),
                    ("qualified", &["converted", "lost"]),
                    ("converted", &[]),
                    ("lost", &[]),
                ],
            ),
            EntityType::Financial => StateDefinition::from_edges(
                &["pendente"],
                &[("pendente", &["pago"]), ("pago", &[])],
            ),
            EntityType::Client => StateDefinition::from_edges(
                &["pending", "active"],
                &[
                    ("pending", &["active", "closed"]),
                    ("active", &["archived", "closed"]),
                    ("archived", &["active"]),
                    ("closed", &[]),
                ],
            ),
            EntityType::Insight => StateDefinition::from_edges(
                &["novo"],
                &[
                    ("novo", &["visualizado", "resolvido", "descartado"]),
                    ("visualizado", &["resolvido", "descartado"]),
                    ("resolvido", &[]),
                    ("descartado", &[]),
                ],
            ),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ValidationError;

    /// Accepts the canonical tags and the Portuguese tags used by older
    /// clients (`processo`, `documento`, `financeiro`, `cliente`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "process" | "processo" => Ok(EntityType::Process),
            "document" | "documento" => Ok(EntityType::Document),
            "agenda" => Ok(EntityType::Agenda),
            "pipeline" => Ok(EntityType::Pipeline),
            "financial" | "financeiro" => Ok(EntityType::Financial),
            "client" | "cliente" => Ok(EntityType::Client),
            "insight" => Ok(EntityType::Insight),
            other => Err(ValidationError::UnknownEntityType(other.to_string())),
        }
    }
}
