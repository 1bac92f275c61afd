//! Rule-based requirements analyzer.
//!
//! Extracts signals from the joined conversation text with word-bounded regular
//! expressions, then maps the signals onto a fixed recommendation template
//! priced from the [`Catalog`].

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::{AnalysisOutcome, RequirementsAnalyzer};
use crate::catalog::{Catalog, ResourceType, MIN_BLOCK_VOLUME_GB};
use crate::config::settings::AnalysisConfig;
use crate::models::{ConversationMessage, CostPreference, ResourceRecommendation, UserPreferences};
use crate::{CloudwrightError, CloudwrightResult};

pub const COMPUTE_NAME: &str = "WebServer";
pub const NETWORK_NAME: &str = "WebsiteVCN";
pub const LOAD_BALANCER_NAME: &str = "WebsiteLoadBalancer";
pub const DATABASE_NAME: &str = "WebsiteDB";
pub const STORAGE_NAME: &str = "WebsiteStorage";
pub const BUCKET_NAME: &str = "WebsiteBucket";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Static,
    Dynamic,
    Ecommerce,
    Blog,
    Api,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Relational,
    NoSql,
    General,
}

/// Everything the rules extracted from one conversation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signals {
    pub workload: Option<WorkloadKind>,
    pub traffic: Option<TrafficLevel>,
    pub database: Option<DatabaseKind>,
    pub storage_gb: Option<u64>,
    pub object_storage: bool,
    pub budget: Option<f64>,
    pub high_availability: bool,
    pub scaling: bool,
    pub region: Option<&'static str>,
}

impl Signals {
    pub fn is_empty(&self) -> bool {
        self.workload.is_none()
            && self.traffic.is_none()
            && self.database.is_none()
            && self.storage_gb.is_none()
            && !self.object_storage
    }
}

struct Patterns {
    workload: Vec<(Regex, WorkloadKind)>,
    traffic: Vec<(Regex, TrafficLevel)>,
    database: Regex,
    nosql: Regex,
    relational: Regex,
    storage: Regex,
    object_storage: Regex,
    budget: Regex,
    availability: Regex,
    scaling: Regex,
    region: Vec<(Regex, &'static str)>,
}

fn compile(pattern: &str) -> CloudwrightResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| CloudwrightError::Internal(format!("invalid analyzer pattern: {}", e)))
}

impl Patterns {
    fn build() -> CloudwrightResult<Self> {
        Ok(Self {
            workload: vec![
                (
                    compile(r"(?i)\b(static|simple)\s+(website|site|web\s*pages?)\b")?,
                    WorkloadKind::Static,
                ),
                (
                    compile(r"(?i)\b(dynamic|interactive)\s+(website|site|web\s+app(lication)?)\b")?,
                    WorkloadKind::Dynamic,
                ),
                (
                    compile(r"(?i)\b(e-?commerce|online\s+store|shop)\b")?,
                    WorkloadKind::Ecommerce,
                ),
                (
                    compile(r"(?i)\b(blog|content\s+management|cms)\b")?,
                    WorkloadKind::Blog,
                ),
                (
                    compile(r"(?i)\b(api|backend|web\s+service|microservices?)\b")?,
                    WorkloadKind::Api,
                ),
                (
                    compile(r"(?i)\b(website|web\s*site|web\s+app(lication)?|web\s+server)\b")?,
                    WorkloadKind::General,
                ),
            ],
            traffic: vec![
                (
                    compile(r"(?i)\b(low|small|minimal)\s+(traffic|visitors|users)\b")?,
                    TrafficLevel::Low,
                ),
                (
                    compile(r"(?i)\b(medium|moderate)\s+(traffic|visitors|users)\b")?,
                    TrafficLevel::Medium,
                ),
                (
                    compile(r"(?i)\b(high|large|heavy|substantial)\s+(traffic|visitors|users)\b")?,
                    TrafficLevel::High,
                ),
            ],
            database: compile(
                r"(?i)\b(database|db|data\s+storage|sql|mysql|postgres(ql)?|mongodb|nosql)\b",
            )?,
            nosql: compile(r"(?i)\b(nosql|mongodb|document\s+store|key-value)\b")?,
            relational: compile(r"(?i)\b(sql|relational|mysql|postgres(ql)?)\b")?,
            storage: compile(r"(?i)\b(\d+)\s*(gb|tb|gigabytes?|terabytes?)\b")?,
            object_storage: compile(r"(?i)\b(object\s+storage|buckets?|static\s+assets)\b")?,
            budget: compile(r"(?i)\bbudget\s+(?:of\s+|is\s+)?\$?(\d+(?:\.\d+)?)")?,
            availability: compile(
                r"(?i)\b(high\s+availability|highly\s+available|always\s+available|99\.9+%?)",
            )?,
            scaling: compile(r"(?i)\b(scal(e|es|ing|able)|grow(th|ing)?|expand)\b")?,
            region: vec![
                (
                    compile(r"\b(US|USA)\b|(?i)\b(united\s+states|north\s+america|america)\b")?,
                    "us",
                ),
                (compile(r"\bEU\b|(?i)\b(europe|european)\b")?, "eu"),
                (compile(r"(?i)\b(asia|apac|asia\s+pacific|japan)\b")?, "asia"),
            ],
        })
    }
}

/// Map a region hint to a provider region name
pub fn region_for_hint(hint: &str) -> Option<&'static str> {
    match hint {
        "us" => Some("us-ashburn-1"),
        "eu" => Some("eu-frankfurt-1"),
        "asia" => Some("ap-tokyo-1"),
        _ => None,
    }
}

/// Default analyzer backed by keyword rules
pub struct RuleBasedAnalyzer {
    catalog: Arc<Catalog>,
    config: AnalysisConfig,
    patterns: Patterns,
}

impl RuleBasedAnalyzer {
    pub fn new(catalog: Arc<Catalog>, config: AnalysisConfig) -> CloudwrightResult<Self> {
        Ok(Self {
            catalog,
            config,
            patterns: Patterns::build()?,
        })
    }

    pub fn extract_signals(&self, conversation: &[ConversationMessage]) -> Signals {
        let text = conversation
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let p = &self.patterns;

        let workload = p
            .workload
            .iter()
            .find(|(re, _)| re.is_match(&text))
            .map(|(_, kind)| *kind);

        let traffic = p
            .traffic
            .iter()
            .find(|(re, _)| re.is_match(&text))
            .map(|(_, level)| *level);

        let database = if p.database.is_match(&text) {
            if p.nosql.is_match(&text) {
                Some(DatabaseKind::NoSql)
            } else if p.relational.is_match(&text) {
                Some(DatabaseKind::Relational)
            } else {
                Some(DatabaseKind::General)
            }
        } else {
            None
        };

        let storage_gb = p.storage.captures(&text).and_then(|caps| {
            let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
            let unit = caps.get(2)?.as_str().to_lowercase();
            if unit.starts_with('t') {
                Some(amount.saturating_mul(1024))
            } else {
                Some(amount)
            }
        });

        let budget = p
            .budget
            .captures(&text)
            .and_then(|caps| caps.get(1)?.as_str().parse().ok());

        let region = p
            .region
            .iter()
            .find(|(re, _)| re.is_match(&text))
            .map(|(_, hint)| *hint);

        Signals {
            workload,
            traffic,
            database,
            storage_gb,
            object_storage: p.object_storage.is_match(&text),
            budget,
            high_availability: p.availability.is_match(&text),
            scaling: p.scaling.is_match(&text),
            region,
        }
    }

    fn resolve_region(&self, signals: &Signals, preferences: &UserPreferences) -> String {
        if let Some(region) = preferences.region.as_ref().filter(|r| !r.trim().is_empty()) {
            return region.clone();
        }
        signals
            .region
            .and_then(region_for_hint)
            .map(str::to_string)
            .unwrap_or_else(|| self.config.default_region.clone())
    }

    fn compute(&self, signals: &Signals, cost: CostPreference, region: &str) -> ResourceRecommendation {
        let mut shape = "VM.Standard.E4.Flex";
        let mut ocpus: u32 = 1;
        let mut memory: u32 = 16;
        let mut instances: u32 = 1;

        match signals.workload {
            Some(WorkloadKind::Static) => {
                shape = "VM.Standard.A1.Flex";
                memory = 6;
            }
            Some(WorkloadKind::Ecommerce) => {
                ocpus = 2;
            }
            _ => {}
        }

        if signals.traffic == Some(TrafficLevel::High) {
            instances = 2;
            ocpus = ocpus.max(4);
            memory = memory.max(32);
        }
        if signals.high_availability {
            instances = instances.max(2);
        }

        match cost {
            CostPreference::CostOptimized => {
                shape = "VM.Standard.A1.Flex";
                if signals.traffic != Some(TrafficLevel::High) {
                    ocpus = 1;
                }
            }
            CostPreference::Performance => {
                ocpus *= 2;
                memory *= 2;
            }
            CostPreference::Balanced => {}
        }

        let mut rec = ResourceRecommendation::new(
            ResourceType::Compute,
            COMPUTE_NAME,
            "Compute instance for hosting the website",
            self.catalog.compute_monthly_cost(ocpus, instances),
        )
        .with_config("shape", shape)
        .with_config("ocpus", ocpus)
        .with_config("memory_in_gbs", memory)
        .with_config("instance_count", instances)
        .with_config("image_id", "Oracle-Linux-8.6-2022.05.31-0")
        .with_config("region", region);

        if signals.scaling {
            rec = rec
                .with_config("autoscaling", true)
                .with_config("min_instances", instances)
                .with_config("max_instances", instances * 3);
        }
        rec
    }

    fn network(&self, region: &str) -> ResourceRecommendation {
        ResourceRecommendation::new(
            ResourceType::Network,
            NETWORK_NAME,
            "Virtual Cloud Network for the website",
            self.catalog.network_monthly_cost(),
        )
        .with_config("vcn_cidr", "10.0.0.0/16")
        .with_config("subnet_cidr", "10.0.0.0/24")
        .with_config(
            "security_list_rules",
            json!([
                {"protocol": "6", "port": 80, "source": "0.0.0.0/0"},
                {"protocol": "6", "port": 443, "source": "0.0.0.0/0"},
                {"protocol": "6", "port": 22, "source": "0.0.0.0/0"},
            ]),
        )
        .with_config("region", region)
    }

    fn load_balancer(&self, region: &str) -> ResourceRecommendation {
        let min_bandwidth = 10;
        ResourceRecommendation::new(
            ResourceType::LoadBalancer,
            LOAD_BALANCER_NAME,
            "Load balancer for distributing traffic",
            self.catalog.load_balancer_monthly_cost(min_bandwidth),
        )
        .with_config("shape", "flexible")
        .with_config("min_bandwidth_mbps", min_bandwidth)
        .with_config("max_bandwidth_mbps", 100)
        .with_config("region", region)
        .depends_on(NETWORK_NAME)
    }

    fn database(&self, kind: DatabaseKind, signals: &Signals, region: &str) -> ResourceRecommendation {
        let high = signals.traffic == Some(TrafficLevel::High);
        let cores = if high { 2 } else { 1 };
        let storage_tbs = if high { 2 } else { 1 };

        let mut rec = ResourceRecommendation::new(
            ResourceType::Database,
            DATABASE_NAME,
            "Database for the website",
            self.catalog.database_monthly_cost(cores),
        )
        .with_config("workload_type", "OLTP")
        .with_config("storage_in_tbs", storage_tbs)
        .with_config("cpu_core_count", cores)
        .with_config("region", region)
        .depends_on(NETWORK_NAME);

        rec = match kind {
            DatabaseKind::NoSql => rec
                .with_config("type", "nosql")
                .with_config("table_name", "WebsiteTable"),
            DatabaseKind::Relational => rec
                .with_config("type", "autonomous")
                .with_config("db_name", "WEBSITEDB"),
            DatabaseKind::General => rec.with_config("type", "autonomous"),
        };
        rec
    }

    fn block_storage(&self, signals: &Signals, cost: CostPreference, region: &str) -> ResourceRecommendation {
        let mut size = signals.storage_gb.unwrap_or(MIN_BLOCK_VOLUME_GB).max(MIN_BLOCK_VOLUME_GB);
        match signals.workload {
            Some(WorkloadKind::Static) => size = MIN_BLOCK_VOLUME_GB,
            Some(WorkloadKind::Ecommerce) | Some(WorkloadKind::Dynamic) => size = size.max(100),
            _ => {}
        }
        let vpus = match cost {
            CostPreference::CostOptimized => 0,
            CostPreference::Balanced => 10,
            CostPreference::Performance => 20,
        };

        ResourceRecommendation::new(
            ResourceType::Storage,
            STORAGE_NAME,
            "Block volume for the website",
            self.catalog.block_storage_monthly_cost(size),
        )
        .with_config("size_in_gbs", size)
        .with_config("vpus_per_gb", vpus)
        .with_config("region", region)
        .depends_on(COMPUTE_NAME)
    }

    fn bucket(&self, region: &str) -> ResourceRecommendation {
        ResourceRecommendation::new(
            ResourceType::Storage,
            BUCKET_NAME,
            "Object storage bucket for static assets",
            self.catalog.bucket_monthly_cost(),
        )
        .with_config("storage_tier", "Standard")
        .with_config("auto_tiering", true)
        .with_config("region", region)
    }
}

#[async_trait]
impl RequirementsAnalyzer for RuleBasedAnalyzer {
    async fn analyze(
        &self,
        conversation: &[ConversationMessage],
        preferences: &UserPreferences,
    ) -> CloudwrightResult<AnalysisOutcome> {
        let signals = self.extract_signals(conversation);
        debug!(?signals, "Extracted conversation signals");

        if signals.is_empty() {
            return Err(CloudwrightError::insufficient_context(
                "describe the workload, expected traffic, database or storage needs",
            ));
        }

        let region = self.resolve_region(&signals, preferences);
        let cost = preferences
            .cost_preference
            .unwrap_or(self.config.default_cost_preference);

        let compute = self.compute(&signals, cost, &region);
        let multiple_instances = compute
            .configuration
            .get("instance_count")
            .and_then(|v| v.as_u64())
            .map(|n| n > 1)
            .unwrap_or(false);

        let mut recommendations = vec![compute, self.network(&region)];

        if signals.traffic == Some(TrafficLevel::High) || multiple_instances {
            recommendations.push(self.load_balancer(&region));
        }
        if let Some(kind) = signals.database {
            recommendations.push(self.database(kind, &signals, &region));
        }
        recommendations.push(self.block_storage(&signals, cost, &region));
        if signals.object_storage {
            recommendations.push(self.bucket(&region));
        }

        let mut notes = Vec::new();
        let total: f64 = recommendations.iter().map(|r| r.estimated_monthly_cost).sum();
        if let Some(budget) = preferences.budget.or(signals.budget) {
            if total > budget {
                notes.push(format!(
                    "Estimated monthly cost ${:.2} exceeds the budget of ${:.2}",
                    total, budget
                ));
            }
        }

        Ok(AnalysisOutcome {
            recommendations,
            region,
            notes,
        })
    }
}
