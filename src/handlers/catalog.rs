use serde::{Deserialize, Serialize};

use crate::catalog::{ComputeShape, ResourceTypeInfo};
use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTypesResponse {
    pub resource_types: Vec<ResourceTypeInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeShapesResponse {
    pub shapes: Vec<ComputeShape>,
}

/// Catalog reads; available to any authenticated caller
pub struct CatalogHandler {
    orchestrator: Orchestrator,
}

impl CatalogHandler {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn resource_types(&self) -> ResourceTypesResponse {
        ResourceTypesResponse {
            resource_types: self.orchestrator.resource_types(),
        }
    }

    pub fn compute_shapes(&self) -> ComputeShapesResponse {
        ComputeShapesResponse {
            shapes: self.orchestrator.compute_shapes(),
        }
    }
}
