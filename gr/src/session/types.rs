//! Observation and action outcome types for the session boundary

use serde::{Deserialize, Serialize};

use crate::domain::ErrorDetail;

/// Result of a navigation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationOutcome {
    /// URL the session landed on after redirects
    pub final_url: String,

    /// HTTP status of the main document, when observed
    pub status_code: Option<u16>,
}

/// Options for a structured tree capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeCaptureOptions {
    /// Character budget for the encoded tree
    pub char_budget: usize,

    /// Use the compact encoder
    pub compact_encoding: bool,
}

impl Default for TreeCaptureOptions {
    fn default() -> Self {
        Self {
            char_budget: 30_000,
            compact_encoding: false,
        }
    }
}

/// Screen-space bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    /// Center point, where input is dispatched
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// One interactive control from the structured tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractiveElement {
    /// Position in the interactive index
    pub index: usize,

    /// Semantic role (button, link, textbox, ...)
    pub role: String,

    /// Accessible name
    pub name: String,

    /// Current value for inputs
    pub value: Option<String>,

    /// Link destination, for anchor-like roles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,

    /// Bounding box, when layout information was available
    pub bounds: Option<Bounds>,
}

impl InteractiveElement {
    /// Whether the element's box contains a viewport point
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.bounds
            .is_some_and(|b| x >= b.x && x <= b.x + b.width && y >= b.y && y <= b.y + b.height)
    }
}

/// Signals that the structured source under-describes the page
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeficiencySignals {
    /// The semantic tree came back (nearly) empty
    pub empty_tree: bool,

    /// Interactive controls exist visually but few appear in the tree
    pub few_interactive: bool,

    /// Canvas/WebGL surfaces dominate the viewport
    pub canvas_heavy: bool,

    /// Content hidden behind cross-origin iframes
    pub iframe_heavy: bool,
}

impl DeficiencySignals {
    /// Whether any deficiency signal is raised
    pub fn any(&self) -> bool {
        self.empty_tree || self.few_interactive || self.canvas_heavy || self.iframe_heavy
    }
}

/// Scroll position at capture time
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollSnapshot {
    pub scroll_y: f64,
    pub viewport_height: f64,
    pub content_height: f64,
}

impl ScrollSnapshot {
    /// Pixels of content remaining below the fold
    pub fn remaining_scroll_px(&self) -> f64 {
        (self.content_height - self.viewport_height - self.scroll_y).max(0.0)
    }

    /// Whether the viewport is effectively at the bottom
    pub fn at_bottom(&self) -> bool {
        self.remaining_scroll_px() <= 2.0
    }
}

/// Pruned, normalized view of the active page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredTreeCapture {
    /// URL at capture time
    pub url: String,

    /// Interactive controls only
    pub interactive_index: Vec<InteractiveElement>,

    /// Encoded tree text handed to the navigator
    pub encoded: String,

    /// Size of the encoded tree
    pub char_count: usize,

    /// Whether the char budget forced truncation
    pub truncated: bool,

    /// Structured-source deficiency signals
    pub deficiency: DeficiencySignals,

    /// Scroll position at capture time
    pub scroll: ScrollSnapshot,

    /// The page reported load-complete
    pub load_complete: bool,

    /// Significant visual content is present
    pub visible_content: bool,
}

/// Captured viewport image for Tier 2 inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportImage {
    pub base64: String,
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

/// DOM mutation counts observed during action settle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationSummary {
    pub added_nodes: u32,
    pub removed_nodes: u32,
    pub interactive_role_mutation: bool,
}

impl MutationSummary {
    /// Significant: >= 3 added/removed nodes, or any interactive-role mutation
    pub fn is_significant(&self) -> bool {
        self.added_nodes + self.removed_nodes >= 3 || self.interactive_role_mutation
    }
}

/// Coarse status of an executed action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Input dispatched, task continues
    Acted,
    /// Navigator declared the task done
    Done,
    /// Navigator declared the task failed
    Failed,
}

/// Result of executing one action decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub status: ActionStatus,

    /// URL after the settle window
    pub final_url: String,

    /// A navigation completed during settle
    pub navigation_observed: bool,

    /// Mutation counts observed during settle
    pub mutations: MutationSummary,

    /// Focus moved to a different element
    pub focus_changed: bool,

    /// Scroll position changed
    pub scroll_changed: bool,

    /// An input's value changed
    pub input_value_changed: bool,

    /// Data captured by an extract action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted: Option<serde_json::Value>,

    /// Free-form note from the session layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionOutcome {
    /// A quiet outcome: nothing observable changed
    pub fn quiet(url: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Acted,
            final_url: url.into(),
            navigation_observed: false,
            mutations: MutationSummary::default(),
            focus_changed: false,
            scroll_changed: false,
            input_value_changed: false,
            extracted: None,
            message: None,
        }
    }

    /// A significant DOM mutation was observed during settle
    pub fn significant_mutation(&self) -> bool {
        self.mutations.is_significant()
    }

    /// Any observable progress: navigation, mutation, focus, or input change
    pub fn any_progress(&self) -> bool {
        self.navigation_observed || self.significant_mutation() || self.focus_changed || self.input_value_changed
    }
}

/// Per-step snapshot handed to the navigator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// URL the session is on
    pub current_url: String,

    /// Structured capture (index + encoded tree + signals)
    pub capture: StructuredTreeCapture,

    /// Viewport image, present only on the visual tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport_image: Option<ViewportImage>,

    /// Summary lines of earlier steps
    pub history: Vec<String>,

    /// Renderings of previously executed actions
    pub previous_actions: Vec<String>,

    /// Error context from a failed prior step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_context: Option<ErrorDetail>,
}

impl Observation {
    /// Build a structured-only observation over a capture
    pub fn structured(capture: StructuredTreeCapture) -> Self {
        Self {
            current_url: capture.url.clone(),
            capture,
            viewport_image: None,
            history: Vec::new(),
            previous_actions: Vec::new(),
            error_context: None,
        }
    }

    /// Attach a viewport image for the visual tier
    pub fn with_image(mut self, image: ViewportImage) -> Self {
        self.viewport_image = Some(image);
        self
    }

    /// Footprint used for decision-cache freshness comparison
    pub fn footprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.current_url.hash(&mut hasher);
        self.capture.encoded.hash(&mut hasher);
        self.capture.interactive_index.len().hash(&mut hasher);
        hasher.finish()
    }
}

/// One resource usage sample from a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// Cumulative CPU task seconds for the renderer
    pub cpu_task_seconds: f64,

    /// Cumulative script execution seconds
    pub script_seconds: f64,

    /// Current JS heap usage in bytes
    pub heap_used_bytes: u64,

    /// DOM node count
    pub node_count: u32,

    /// Sample wall-clock timestamp (Unix milliseconds)
    pub timestamp_ms: i64,
}
