//! Static knowledge of provisionable resource types, compute shapes and prices.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::settings::PricingConfig;

pub mod shapes;

pub use shapes::{ComputeShape, ShapeRange};

/// Smallest block volume the provider will create, in GB
pub const MIN_BLOCK_VOLUME_GB: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Compute,
    Network,
    Storage,
    Database,
    LoadBalancer,
    Kubernetes,
}

impl ResourceType {
    pub fn all() -> &'static [ResourceType] {
        &[
            ResourceType::Compute,
            ResourceType::Network,
            ResourceType::Storage,
            ResourceType::Database,
            ResourceType::LoadBalancer,
            ResourceType::Kubernetes,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Compute => "compute",
            ResourceType::Network => "network",
            ResourceType::Storage => "storage",
            ResourceType::Database => "database",
            ResourceType::LoadBalancer => "load_balancer",
            ResourceType::Kubernetes => "kubernetes",
        }
    }

    /// Provider offerings that fall under this type
    pub fn offerings(&self) -> &'static [&'static str] {
        match self {
            ResourceType::Compute => &["Compute Instance"],
            ResourceType::Network => &[
                "Virtual Cloud Network",
                "Subnet",
                "Internet Gateway",
                "Route Table",
                "Security List",
                "Network Security Group",
            ],
            ResourceType::Storage => &["Block Volume", "Object Storage Bucket", "File Storage"],
            ResourceType::Database => &["Autonomous Database"],
            ResourceType::LoadBalancer => &["Load Balancer"],
            ResourceType::Kubernetes => &["Kubernetes Cluster"],
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTypeInfo {
    pub resource_type: ResourceType,
    pub offerings: Vec<String>,
}

/// Read-only catalog shared by the analyzer and the transports
#[derive(Debug, Clone)]
pub struct Catalog {
    pricing: PricingConfig,
}

impl Catalog {
    pub fn new(pricing: PricingConfig) -> Self {
        Self { pricing }
    }

    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    pub fn resource_types(&self) -> Vec<ResourceTypeInfo> {
        ResourceType::all()
            .iter()
            .map(|t| ResourceTypeInfo {
                resource_type: *t,
                offerings: t.offerings().iter().map(|s| s.to_string()).collect(),
            })
            .collect()
    }

    pub fn compute_shapes(&self) -> Vec<ComputeShape> {
        shapes::builtin_shapes()
    }

    pub fn shape(&self, name: &str) -> Option<ComputeShape> {
        shapes::builtin_shapes().into_iter().find(|s| s.name == name)
    }

    pub fn compute_monthly_cost(&self, ocpus: u32, instance_count: u32) -> f64 {
        self.pricing.compute_ocpu_month * ocpus as f64 * instance_count as f64
    }

    pub fn load_balancer_monthly_cost(&self, min_bandwidth_mbps: u32) -> f64 {
        self.pricing.load_balancer_base_month
            + self.pricing.load_balancer_mbps_hour
                * self.pricing.hours_per_month
                * min_bandwidth_mbps as f64
    }

    pub fn database_monthly_cost(&self, cpu_core_count: u32) -> f64 {
        self.pricing.database_ocpu_month * cpu_core_count as f64
    }

    /// Block volume cost; sizes below the provider minimum are billed at the minimum
    pub fn block_storage_monthly_cost(&self, size_gb: u64) -> f64 {
        self.pricing.storage_gb_month * size_gb.max(MIN_BLOCK_VOLUME_GB) as f64
    }

    pub fn bucket_monthly_cost(&self) -> f64 {
        self.pricing.storage_gb_month * self.pricing.bucket_default_gb
    }

    pub fn network_monthly_cost(&self) -> f64 {
        0.0
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(PricingConfig::default())
    }
}
