
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;

/// System prompt for scenarios the catalog knows nothing about
pub const GENERIC_SYSTEM_PROMPT: &str = "You are a helpful customer support assistant.";

const BASE_TEMPLATE: &str = include_str!("../templates/base/system_base.md");
const ECOMMERCE_TEMPLATE: &str = include_str!("../templates/ecommerce/system.md");
const SAAS_TEMPLATE: &str = include_str!("../templates/saas/system.md");
const SERVICE_TEMPLATE: &str = include_str!("../templates/service/system.md");

const BASE_TEMPLATE_PATH: &str = "base/system_base.md";

/// Category suffix joining ingestion, scoped search and prompt assembly
const BUSINESS_CONTEXT_SUFFIX: &str = "_BUSINESS_CONTEXT";

/// Built-in business scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioKind {
    Ecommerce,
    Saas,
    ServiceBusiness,
}

impl ScenarioKind {
    pub const ALL: [Self; 3] = [Self::Ecommerce, Self::Saas, Self::ServiceBusiness];

    #[inline]
    pub fn id(self) -> &'static str {
        match self {
            Self::Ecommerce => "ECOMMERCE",
            Self::Saas => "SAAS",
            Self::ServiceBusiness => "SERVICE_BUSINESS",
        }
    }

    /// Case-insensitive lookup of a built-in id
    #[inline]
    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.id().eq_ignore_ascii_case(id))
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Self::Ecommerce => "E-Commerce Store",
            Self::Saas => "SaaS Platform",
            Self::ServiceBusiness => "Service Business",
        }
    }

    #[inline]
    pub fn description(self) -> &'static str {
        match self {
            Self::Ecommerce => "Customer support for online retail business",
            Self::Saas => "Technical support for software services",
            Self::ServiceBusiness => "Support for service-based businesses",
        }
    }

    #[inline]
    pub fn icon(self) -> &'static str {
        match self {
            Self::Ecommerce => "ShoppingCart",
            Self::Saas => "Monitor",
            Self::ServiceBusiness => "Briefcase",
        }
    }

    #[inline]
    pub fn color_gradient(self) -> &'static str {
        match self {
            Self::Ecommerce => "from-green-500 to-emerald-600",
            Self::Saas => "from-blue-500 to-cyan-600",
            Self::ServiceBusiness => "from-purple-500 to-pink-600",
        }
    }

    /// Static reply used when text generation fails
    #[inline]
    pub fn fallback_message(self) -> &'static str {
        match self {
            Self::Ecommerce => {
                "I apologize, but I'm experiencing some technical difficulties right now. \
                 Please contact our support team at support@company.com or try again in a few minutes."
            }
            Self::Saas => {
                "I'm currently experiencing technical issues. Please check our status page \
                 or contact our technical support team for immediate assistance."
            }
            Self::ServiceBusiness => {
                "I'm sorry, but I'm having trouble processing your request right now. \
                 Please call us directly or try again shortly."
            }
        }
    }

    /// Topics customers of this kind of business usually ask about
    #[inline]
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Ecommerce => &["product", "order", "shipping", "return", "refund", "payment"],
            Self::Saas => &["feature", "account", "billing", "integration", "api", "setup"],
            Self::ServiceBusiness => &["appointment", "booking", "service", "pricing", "availability"],
        }
    }

    /// Directory under a prompts dir holding this scenario's `system.md`
    #[inline]
    pub fn template_dir(self) -> &'static str {
        match self {
            Self::Ecommerce => "ecommerce",
            Self::Saas => "saas",
            Self::ServiceBusiness => "service",
        }
    }

    fn embedded_template(self) -> &'static str {
        match self {
            Self::Ecommerce => ECOMMERCE_TEMPLATE,
            Self::Saas => SAAS_TEMPLATE,
            Self::ServiceBusiness => SERVICE_TEMPLATE,
        }
    }
}

impl std::fmt::Display for ScenarioKind {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Which scenario a conversation runs under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scenario {
    BuiltIn(ScenarioKind),
    Custom(String),
}

impl Scenario {
    /// Built-in when `id` names one, custom otherwise
    #[inline]
    pub fn from_id(id: &str) -> Self {
        ScenarioKind::from_id(id).map_or_else(|| Self::Custom(id.trim().to_string()), Self::BuiltIn)
    }

    #[inline]
    pub fn id(&self) -> &str {
        match self {
            Self::BuiltIn(kind) => kind.id(),
            Self::Custom(id) => id,
        }
    }

    /// Category under which this scenario's business knowledge is stored
    #[inline]
    pub fn business_context_category(&self) -> String {
        business_context_category(self.id())
    }
}

impl std::fmt::Display for Scenario {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// `"<SCENARIO_ID_UPPERCASE>_BUSINESS_CONTEXT"`
#[inline]
pub fn business_context_category(scenario_id: &str) -> String {
    format!(
        "{}{}",
        scenario_id.trim().to_uppercase(),
        BUSINESS_CONTEXT_SUFFIX
    )
}

fn default_icon() -> String {
    "Briefcase".to_string()
}

fn default_color_gradient() -> String {
    "from-gray-500 to-gray-600".to_string()
}

fn default_tone() -> String {
    "Professional".to_string()
}

/// A user-defined scenario, configured under `[[scenarios]]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomScenario {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default = "default_color_gradient")]
    pub color_gradient: String,
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_queries: Vec<String>,
    /// Fixed business context placed in every prompt for this scenario
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_message: Option<String>,
}

impl CustomScenario {
    #[inline]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            system_prompt: system_prompt.into(),
            icon: default_icon(),
            color_gradient: default_color_gradient(),
            tone: default_tone(),
            sample_queries: Vec::new(),
            business_context: None,
            fallback_message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioSource {
    BuiltIn,
    Custom,
}

/// Everything needed to display a scenario and prompt under it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioProfile {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub color_gradient: String,
    #[serde(rename = "type")]
    pub source: ScenarioSource,
    pub system_prompt: String,
    pub fallback_message: String,
    pub tone: Option<String>,
    pub sample_queries: Vec<String>,
    pub business_context: Option<String>,
}

/// Availability of one prompt template file under a prompts directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateStatus {
    pub path: String,
    pub exists: bool,
}

/// Built-in scenarios plus the custom ones from configuration
#[derive(Debug, Clone, Default)]
pub struct ScenarioCatalog {
    custom: Vec<CustomScenario>,
    prompts_dir: Option<PathBuf>,
}

impl ScenarioCatalog {
    #[inline]
    pub fn new(custom: Vec<CustomScenario>, prompts_dir: Option<PathBuf>) -> Self {
        Self {
            custom,
            prompts_dir,
        }
    }

    #[inline]
    pub fn from_config(config: &Config) -> Self {
        let prompts_dir = config.prompts_dir.as_ref().map(|dir| {
            if dir.is_relative() {
                config.get_base_dir().join(dir)
            } else {
                dir.clone()
            }
        });
        Self::new(config.scenarios.clone(), prompts_dir)
    }

    #[inline]
    pub fn resolve(&self, id: &str) -> Scenario {
        match Scenario::from_id(id) {
            Scenario::Custom(custom_id) => {
                // Normalise to the configured spelling of the id
                let id = self
                    .custom(&custom_id)
                    .map_or(custom_id, |custom| custom.id.clone());
                Scenario::Custom(id)
            }
            built_in @ Scenario::BuiltIn(_) => built_in,
        }
    }

    /// Whether `id` names a built-in or configured scenario
    #[inline]
    pub fn is_known(&self, id: &str) -> bool {
        ScenarioKind::from_id(id).is_some() || self.custom(id).is_some()
    }

    #[inline]
    pub fn custom(&self, id: &str) -> Option<&CustomScenario> {
        let id = id.trim();
        self.custom
            .iter()
            .find(|scenario| scenario.id.trim().eq_ignore_ascii_case(id))
    }

    /// Base instructions followed by the scenario's own prompt
    #[inline]
    pub fn system_prompt(&self, scenario: &Scenario) -> String {
        match scenario {
            Scenario::BuiltIn(kind) => {
                let base = self.template(BASE_TEMPLATE_PATH, BASE_TEMPLATE);
                let specific = self.template(
                    &format!("{}/system.md", kind.template_dir()),
                    kind.embedded_template(),
                );
                format!("{}\n\n{}", base.trim_end(), specific.trim_end())
            }
            Scenario::Custom(id) => self.custom(id).map_or_else(
                || GENERIC_SYSTEM_PROMPT.to_string(),
                |custom| custom.system_prompt.clone(),
            ),
        }
    }

    #[inline]
    pub fn fallback_message(&self, scenario: &Scenario) -> String {
        match scenario {
            Scenario::BuiltIn(kind) => kind.fallback_message().to_string(),
            Scenario::Custom(id) => self
                .custom(id)
                .and_then(|custom| custom.fallback_message.clone())
                .unwrap_or_else(|| ScenarioKind::Ecommerce.fallback_message().to_string()),
        }
    }

    #[inline]
    pub fn profile(&self, scenario: &Scenario) -> ScenarioProfile {
        let system_prompt = self.system_prompt(scenario);
        let fallback_message = self.fallback_message(scenario);

        match scenario {
            Scenario::BuiltIn(kind) => ScenarioProfile {
                id: kind.id().to_string(),
                name: kind.name().to_string(),
                description: kind.description().to_string(),
                icon: kind.icon().to_string(),
                color_gradient: kind.color_gradient().to_string(),
                source: ScenarioSource::BuiltIn,
                system_prompt,
                fallback_message,
                tone: None,
                sample_queries: Vec::new(),
                business_context: None,
            },
            Scenario::Custom(id) => match self.custom(id) {
                Some(custom) => ScenarioProfile {
                    id: custom.id.clone(),
                    name: custom.name.clone(),
                    description: custom.description.clone(),
                    icon: custom.icon.clone(),
                    color_gradient: custom.color_gradient.clone(),
                    source: ScenarioSource::Custom,
                    system_prompt,
                    fallback_message,
                    tone: Some(custom.tone.clone()),
                    sample_queries: custom.sample_queries.clone(),
                    business_context: custom.business_context.clone(),
                },
                None => ScenarioProfile {
                    id: id.clone(),
                    name: id.clone(),
                    description: String::new(),
                    icon: default_icon(),
                    color_gradient: default_color_gradient(),
                    source: ScenarioSource::Custom,
                    system_prompt,
                    fallback_message,
                    tone: None,
                    sample_queries: Vec::new(),
                    business_context: None,
                },
            },
        }
    }

    /// Built-in scenarios first, then custom ones in configuration order
    #[inline]
    pub fn list(&self) -> Vec<ScenarioProfile> {
        ScenarioKind::ALL
            .into_iter()
            .map(Scenario::BuiltIn)
            .chain(
                self.custom
                    .iter()
                    .map(|custom| Scenario::Custom(custom.id.clone())),
            )
            .map(|scenario| self.profile(&scenario))
            .collect()
    }

    /// Which override files exist under the prompts directory. Empty without one.
    #[inline]
    pub fn template_status(&self) -> Vec<TemplateStatus> {
        let Some(dir) = &self.prompts_dir else {
            return Vec::new();
        };

        std::iter::once(BASE_TEMPLATE_PATH.to_string())
            .chain(
                ScenarioKind::ALL
                    .iter()
                    .map(|kind| format!("{}/system.md", kind.template_dir())),
            )
            .map(|path| TemplateStatus {
                exists: dir.join(&path).is_file(),
                path,
            })
            .collect()
    }

    #[inline]
    pub fn prompts_dir(&self) -> Option<&Path> {
        self.prompts_dir.as_deref()
    }

    /// Template text from the prompts directory, or the built-in copy
    fn template(&self, relative_path: &str, embedded: &'static str) -> String {
        let Some(dir) = &self.prompts_dir else {
            return embedded.to_string();
        };

        let path = dir.join(relative_path);
        match fs::read_to_string(&path) {
            Ok(content) => {
                debug!("Loaded prompt template {}", path.display());
                content
            }
            Err(e) => {
                warn!(
                    "Using built-in prompt template, failed to read {}: {}",
                    path.display(),
                    e
                );
                embedded.to_string()
            }
        }
    }
}
