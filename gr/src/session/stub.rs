//! Deterministic scripted SessionClient for tests
//!
//! The stub plays back configured pages, action outcomes, and resource
//! samples without any browser. Crash injection and navigation failure
//! hooks let tests drive the recovery paths deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::InterceptionMode;
use crate::domain::now_ms;
use crate::navigator::{ActionDecision, ActionKind};

use super::client::{CrashSignal, SessionClient, SessionError};
use super::types::{
    ActionOutcome, ActionStatus, Bounds, DeficiencySignals, InteractiveElement, NavigationOutcome, ResourceSample,
    ScrollSnapshot, StructuredTreeCapture, TreeCaptureOptions, ViewportImage,
};

/// A scripted page the stub serves for a url
#[derive(Debug, Clone)]
pub struct StubPage {
    pub capture: StructuredTreeCapture,
    pub image: ViewportImage,
}

impl StubPage {
    /// A well-formed page with `n` interactive controls
    pub fn simple(url: impl Into<String>, n: usize) -> Self {
        let url = url.into();
        let interactive_index: Vec<InteractiveElement> = (0..n)
            .map(|i| InteractiveElement {
                index: i,
                role: if i % 2 == 0 { "button" } else { "link" }.to_string(),
                name: format!("control {}", i),
                value: None,
                href: None,
                bounds: Some(Bounds {
                    x: 20.0,
                    y: 40.0 * (i as f64 + 1.0),
                    width: 120.0,
                    height: 32.0,
                }),
            })
            .collect();
        let encoded: String = interactive_index
            .iter()
            .map(|e| format!("{}:{}\n", e.role, e.name))
            .collect();

        Self {
            capture: StructuredTreeCapture {
                url: url.clone(),
                char_count: encoded.len(),
                encoded,
                interactive_index,
                truncated: false,
                deficiency: DeficiencySignals::default(),
                scroll: ScrollSnapshot {
                    scroll_y: 0.0,
                    viewport_height: 800.0,
                    content_height: 2400.0,
                },
                load_complete: true,
                visible_content: true,
            },
            image: ViewportImage {
                base64: "aW1n".to_string(),
                mime: "image/jpeg".to_string(),
                width: 1280,
                height: 800,
            },
        }
    }

    /// A structured-deficient page (canvas-heavy, empty tree)
    pub fn deficient(url: impl Into<String>) -> Self {
        let mut page = Self::simple(url, 0);
        page.capture.deficiency = DeficiencySignals {
            empty_tree: true,
            canvas_heavy: true,
            ..Default::default()
        };
        page
    }

    /// Replace a control's accessible name
    pub fn with_control(mut self, index: usize, role: &str, name: &str) -> Self {
        if let Some(element) = self.capture.interactive_index.get_mut(index) {
            element.role = role.to_string();
            element.name = name.to_string();
        }
        self
    }

    /// Turn a control into a link with a destination
    pub fn with_link(mut self, index: usize, name: &str, href: &str) -> Self {
        if let Some(element) = self.capture.interactive_index.get_mut(index) {
            element.role = "link".to_string();
            element.name = name.to_string();
            element.href = Some(href.to_string());
        }
        self
    }
}

struct Inner {
    current_url: String,
    pages: HashMap<String, StubPage>,
    outcomes: VecDeque<ActionOutcome>,
    samples: VecDeque<ResourceSample>,
    heap_used_bytes: u64,
    cpu_cumulative: f64,
    cpu_increment_per_sample: f64,
    crash_on_action: Option<usize>,
    fail_navigate_with: Option<SessionError>,
    actions_executed: usize,
    executed: Vec<ActionDecision>,
    navigations: Vec<String>,
    prefetched: Vec<String>,
    interception_modes: Vec<InterceptionMode>,
    closed: bool,
}

/// Scripted session stub
pub struct StubSessionClient {
    context_id: String,
    crash: CrashSignal,
    inner: Mutex<Inner>,
}

impl StubSessionClient {
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            crash: CrashSignal::new(),
            inner: Mutex::new(Inner {
                current_url: "about:blank".to_string(),
                pages: HashMap::new(),
                outcomes: VecDeque::new(),
                samples: VecDeque::new(),
                heap_used_bytes: 50 * 1024 * 1024,
                cpu_cumulative: 0.0,
                cpu_increment_per_sample: 0.0,
                crash_on_action: None,
                fail_navigate_with: None,
                actions_executed: 0,
                executed: Vec::new(),
                navigations: Vec::new(),
                prefetched: Vec::new(),
                interception_modes: Vec::new(),
                closed: false,
            }),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Register a page served for a url
    pub fn set_page(&self, url: impl Into<String>, page: StubPage) {
        self.inner.lock().unwrap().pages.insert(url.into(), page);
    }

    /// Queue the outcome returned by the next execute_action call
    pub fn push_outcome(&self, outcome: ActionOutcome) {
        self.inner.lock().unwrap().outcomes.push_back(outcome);
    }

    /// Queue an explicit resource sample
    pub fn push_sample(&self, sample: ResourceSample) {
        self.inner.lock().unwrap().samples.push_back(sample);
    }

    /// Steady-state heap for synthesized samples
    pub fn set_heap_bytes(&self, bytes: u64) {
        self.inner.lock().unwrap().heap_used_bytes = bytes;
    }

    /// CPU task-seconds added per synthesized sample
    pub fn set_cpu_increment(&self, seconds: f64) {
        self.inner.lock().unwrap().cpu_increment_per_sample = seconds;
    }

    /// Crash the renderer on the n-th execute_action call (0-based)
    pub fn crash_on_action(&self, n: usize) {
        self.inner.lock().unwrap().crash_on_action = Some(n);
    }

    /// Fail the next navigate call with the given error
    pub fn fail_next_navigate(&self, error: SessionError) {
        self.inner.lock().unwrap().fail_navigate_with = Some(error);
    }

    /// Crash the session immediately (as if the renderer died mid-flight)
    pub fn crash_now(&self) {
        self.crash.fire();
        self.inner.lock().unwrap().closed = true;
    }

    pub fn actions_executed(&self) -> usize {
        self.inner.lock().unwrap().actions_executed
    }

    pub fn executed(&self) -> Vec<ActionDecision> {
        self.inner.lock().unwrap().executed.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.inner.lock().unwrap().navigations.clone()
    }

    pub fn prefetched(&self) -> Vec<String> {
        self.inner.lock().unwrap().prefetched.clone()
    }

    pub fn interception_modes(&self) -> Vec<InterceptionMode> {
        self.inner.lock().unwrap().interception_modes.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    fn page_for(inner: &Inner, url: &str) -> StubPage {
        inner.pages.get(url).cloned().unwrap_or_else(|| {
            let mut page = StubPage::simple(url, 5);
            page.capture.url = url.to_string();
            page
        })
    }
}

#[async_trait]
impl SessionClient for StubSessionClient {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<NavigationOutcome, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(SessionError::Closed);
        }
        if let Some(error) = inner.fail_navigate_with.take() {
            return Err(error);
        }
        inner.current_url = url.to_string();
        inner.navigations.push(url.to_string());
        Ok(NavigationOutcome {
            final_url: url.to_string(),
            status_code: Some(200),
        })
    }

    async fn capture_structured_tree(&self, opts: &TreeCaptureOptions) -> Result<StructuredTreeCapture, SessionError> {
        let inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(SessionError::Closed);
        }
        let mut capture = Self::page_for(&inner, &inner.current_url).capture;
        if capture.encoded.len() > opts.char_budget {
            capture.encoded.truncate(opts.char_budget);
            capture.char_count = capture.encoded.len();
            capture.truncated = true;
        }
        Ok(capture)
    }

    async fn capture_viewport_image(&self) -> Result<ViewportImage, SessionError> {
        let inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(SessionError::Closed);
        }
        Ok(Self::page_for(&inner, &inner.current_url).image)
    }

    async fn execute_action(
        &self,
        decision: &ActionDecision,
        _settle_timeout: Duration,
    ) -> Result<ActionOutcome, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(SessionError::Closed);
        }
        if inner.crash_on_action == Some(inner.actions_executed) {
            inner.closed = true;
            self.crash.fire();
            return Err(SessionError::Crashed);
        }

        inner.actions_executed += 1;
        inner.executed.push(decision.clone());

        let outcome = inner.outcomes.pop_front().unwrap_or_else(|| {
            let mut outcome = ActionOutcome::quiet(inner.current_url.clone());
            outcome.status = match decision.kind {
                ActionKind::Done => ActionStatus::Done,
                ActionKind::Failed => ActionStatus::Failed,
                _ => ActionStatus::Acted,
            };
            outcome
        });

        if outcome.navigation_observed {
            inner.current_url = outcome.final_url.clone();
        }
        Ok(outcome)
    }

    async fn sample_resource_metrics(&self) -> Result<ResourceSample, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(SessionError::Closed);
        }
        if let Some(sample) = inner.samples.pop_front() {
            return Ok(sample);
        }
        inner.cpu_cumulative += inner.cpu_increment_per_sample;
        Ok(ResourceSample {
            cpu_task_seconds: inner.cpu_cumulative,
            script_seconds: inner.cpu_cumulative * 0.6,
            heap_used_bytes: inner.heap_used_bytes,
            node_count: 1_200,
            timestamp_ms: now_ms(),
        })
    }

    async fn current_url(&self) -> String {
        self.inner.lock().unwrap().current_url.clone()
    }

    fn crash_signal(&self) -> CrashSignal {
        self.crash.clone()
    }

    async fn set_interception_mode(&self, mode: InterceptionMode) -> Result<(), SessionError> {
        self.inner.lock().unwrap().interception_modes.push(mode);
        Ok(())
    }

    async fn prefetch(&self, url: &str) -> Result<(), SessionError> {
        self.inner.lock().unwrap().prefetched.push(url.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.inner.lock().unwrap().closed = true;
        Ok(())
    }
}
