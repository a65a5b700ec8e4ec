//! Types d'erreurs pour le crate evpoi

use thiserror::Error;

use crate::spatial::Crs;

/// Erreurs pouvant survenir lors du décodage ou du filtrage des POI
#[derive(Debug, Error)]
pub enum PoiError {
    /// Réponse JSON de l'API illisible
    #[error("Invalid POI payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// Les points et le polygone ne partagent pas le même CRS
    #[error("CRS mismatch: records are in {expected}, boundary is in {found}")]
    CrsMismatch { expected: Crs, found: Crs },

    /// Géométrie de limite inutilisable
    #[error("Invalid boundary geometry: {0}")]
    InvalidBoundary(String),
}

impl PoiError {
    /// Crée une erreur de limite invalide
    pub fn invalid_boundary(reason: impl Into<String>) -> Self {
        Self::InvalidBoundary(reason.into())
    }

    /// Indique une erreur de configuration (à corriger avant de relancer)
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::CrsMismatch { .. })
    }
}
