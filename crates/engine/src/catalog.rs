//! Capability catalog for the supported AI image backends.
//!
//! Static metadata describing each backend's quality, speed, cost tier, and
//! declared capabilities. The catalog is pure data: no I/O, no failure modes.
//! Live availability is layered on top by the registry and selector.

use serde::{Deserialize, Serialize};

/// The kind of work a job asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Automatic cleanup/enhancement of an uploaded image.
    Optimize,
    /// Prompt-driven transformation of an existing image.
    Edit,
    /// Iteration on a prior edit within the same session.
    Refine,
    /// Standalone generation for export (no source image required).
    Export,
}

impl TaskType {
    /// Capabilities a backend must declare to handle this task type.
    pub fn required_capabilities(&self) -> &'static [Capability] {
        match self {
            TaskType::Optimize => &[Capability::Optimize],
            TaskType::Edit => &[Capability::Edit],
            TaskType::Refine => &[Capability::Edit],
            TaskType::Export => &[Capability::Generate],
        }
    }

    /// Minimum catalog quality expected for this task type.
    ///
    /// Refinement passes are the most quality-sensitive: the user is already
    /// iterating on a result they care about.
    pub fn required_quality(&self) -> u8 {
        match self {
            TaskType::Optimize => 5,
            TaskType::Edit => 7,
            TaskType::Refine => 8,
            TaskType::Export => 6,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Optimize => write!(f, "optimize"),
            TaskType::Edit => write!(f, "edit"),
            TaskType::Refine => write!(f, "refine"),
            TaskType::Export => write!(f, "export"),
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "optimize" => Ok(TaskType::Optimize),
            "edit" => Ok(TaskType::Edit),
            "refine" => Ok(TaskType::Refine),
            "export" => Ok(TaskType::Export),
            other => Err(format!("unknown task type: {}", other)),
        }
    }
}

/// Identifier of one external AI image backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    Flux,
    Dalle,
    Sdxl,
    Pixart,
}

impl BackendId {
    /// All known backend ids, in catalog order.
    pub const ALL: &'static [BackendId] = &[
        BackendId::Flux,
        BackendId::Dalle,
        BackendId::Sdxl,
        BackendId::Pixart,
    ];

    /// Stable string form, matching the config file's `[backends.<id>]` keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::Flux => "flux",
            BackendId::Dalle => "dalle",
            BackendId::Sdxl => "sdxl",
            BackendId::Pixart => "pixart",
        }
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BackendId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flux" => Ok(BackendId::Flux),
            "dalle" => Ok(BackendId::Dalle),
            "sdxl" => Ok(BackendId::Sdxl),
            "pixart" => Ok(BackendId::Pixart),
            other => Err(format!("unknown backend id: {}", other)),
        }
    }
}

/// One operation a backend declares support for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Optimize,
    Edit,
    Inpaint,
    Generate,
    BackgroundReplace,
    DualImage,
}

/// Relative pricing bucket for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    Low,
    Standard,
    Premium,
}

/// Immutable metadata for one backend. Created once at startup, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub id: BackendId,
    /// Output quality on a 0-10 scale.
    pub quality: u8,
    /// Relative speed on a 0-10 scale (higher is faster).
    pub speed: u8,
    pub cost: CostTier,
    pub capabilities: Vec<Capability>,
}

impl BackendDescriptor {
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    /// True iff every capability in `caps` is declared by this backend.
    pub fn supports_all(&self, caps: &[Capability]) -> bool {
        caps.iter().all(|c| self.has_capability(*c))
    }
}

/// Static table of backend metadata.
///
/// Iteration order is the construction order and is the deterministic
/// tie-breaker for selection, so the default table lists backends
/// best-quality first.
#[derive(Debug, Clone)]
pub struct ModelCapabilityCatalog {
    descriptors: Vec<BackendDescriptor>,
}

impl Default for ModelCapabilityCatalog {
    fn default() -> Self {
        Self::new(vec![
            BackendDescriptor {
                id: BackendId::Flux,
                quality: 9,
                speed: 5,
                cost: CostTier::Premium,
                capabilities: vec![
                    Capability::Generate,
                    Capability::Edit,
                    Capability::BackgroundReplace,
                    Capability::DualImage,
                ],
            },
            BackendDescriptor {
                id: BackendId::Dalle,
                quality: 8,
                speed: 6,
                cost: CostTier::Standard,
                capabilities: vec![
                    Capability::Generate,
                    Capability::Edit,
                    Capability::Inpaint,
                    Capability::Optimize,
                ],
            },
            BackendDescriptor {
                id: BackendId::Sdxl,
                quality: 7,
                speed: 7,
                cost: CostTier::Standard,
                capabilities: vec![
                    Capability::Generate,
                    Capability::Edit,
                    Capability::Inpaint,
                    Capability::Optimize,
                    Capability::DualImage,
                ],
            },
            BackendDescriptor {
                id: BackendId::Pixart,
                quality: 5,
                speed: 9,
                cost: CostTier::Low,
                capabilities: vec![Capability::Generate, Capability::Optimize],
            },
        ])
    }
}

impl ModelCapabilityCatalog {
    /// Build a catalog from an explicit descriptor list.
    pub fn new(descriptors: Vec<BackendDescriptor>) -> Self {
        Self { descriptors }
    }

    /// Look up the descriptor for a backend id.
    pub fn capabilities_of(&self, id: BackendId) -> Option<&BackendDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    /// All descriptors in catalog order.
    pub fn all_backends(&self) -> &[BackendDescriptor] {
        &self.descriptors
    }

    /// Backend ids ordered by descending quality (stable within equal quality).
    ///
    /// This is the fixed last-resort priority list used when no ranked
    /// candidate is available.
    pub fn priority_order(&self) -> Vec<BackendId> {
        let mut ids: Vec<(u8, usize, BackendId)> = self
            .descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.quality, i, d.id))
            .collect();
        ids.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        ids.into_iter().map(|(_, _, id)| id).collect()
    }
}
