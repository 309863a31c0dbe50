//! Evaluation context and per-admission state.
//!
//! The [`EvalContext`] is the JSON document `{{ … }}` expressions resolve
//! against. It supports checkpoint/restore with stack discipline: every
//! checkpoint must be balanced by a restore on every exit path, so
//! statement-scoped bindings never leak into the next statement.
//!
//! A [`PolicyContext`] owns everything one admission request needs: the
//! old and new resource trees, the evaluation context, and the
//! cancellation token handed to every blocking call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};

use custodia_policy::context::ContextEntry;
use custodia_policy::extractor::ImageExtractorConfigs;

use crate::error::EngineError;
use crate::extract::{self, ExtractedImages};
use crate::image::ImageInfo;

/// Cancellation handle shared with verifier and context-loader calls.
///
/// Carries a manual cancel flag and an optional deadline; either makes
/// [`CancelToken::is_cancelled`] return true. Callees are expected to
/// check it around blocking I/O and return promptly once set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that never fires unless [`CancelToken::cancel`] is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that fires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                deadline: Some(deadline),
            }),
        }
    }

    /// Cancel all holders of this token.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Whether the token was cancelled or its deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
            || self
                .inner
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// The JSON evaluation context with checkpoint/restore.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    root: Map<String, Value>,
    saved: Vec<Map<String, Value>>,
}

impl EvalContext {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Save the current state; the matching [`EvalContext::restore`] drops
    /// everything added since.
    pub fn checkpoint(&mut self) {
        self.saved.push(self.root.clone());
    }

    /// Roll back to the most recent checkpoint.
    ///
    /// Restoring without a checkpoint is a programming error; it is
    /// reported and ignored so a bug cannot corrupt the admission.
    pub fn restore(&mut self) {
        debug_assert!(!self.saved.is_empty(), "restore without checkpoint");
        match self.saved.pop() {
            Some(saved) => self.root = saved,
            None => tracing::error!("evaluation context restore without matching checkpoint"),
        }
    }

    /// Current checkpoint depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.saved.len()
    }

    /// Merge a JSON object's top-level keys into the current frame.
    pub fn add_json_object(&mut self, object: &Value) -> Result<(), EngineError> {
        let Some(map) = object.as_object() else {
            return Err(EngineError::Context(format!(
                "expected a JSON object, got {object}"
            )));
        };
        for (key, value) in map {
            self.root.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    /// Bind a single named value.
    pub fn add_variable(&mut self, name: &str, value: Value) {
        self.root.insert(name.to_owned(), value);
    }

    /// Expose an image's fields under the `image` binding so expressions
    /// like `{{ image.registry }}` resolve during verification.
    pub fn add_image_info(&mut self, info: &ImageInfo) -> Result<(), EngineError> {
        let object = serde_json::json!({
            "image": {
                "reference": info.reference(),
                "referenceWithTag": info.reference_with_tag(),
                "registry": info.registry,
                "path": info.path,
                "name": info.name,
                "tag": info.tag,
                "digest": info.digest,
            }
        });
        self.add_json_object(&object)
    }

    /// Resolve a dotted path (with optional `[index]` steps) against the
    /// context document.
    #[must_use]
    pub fn query(&self, path: &str) -> Option<Value> {
        let mut current = Value::Object(self.root.clone());
        for segment in path.split('.') {
            let segment = segment.trim();
            if segment.is_empty() {
                return None;
            }
            let (key, indices) = parse_segment(segment)?;
            if !key.is_empty() {
                current = current.get(key)?.clone();
            }
            for index in indices {
                current = current.get(index)?.clone();
            }
        }
        Some(current)
    }
}

/// Split `name[0][1]` into the name and its indices.
fn parse_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(bracket) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };
    let (key, rest) = segment.split_at(bracket);
    let mut indices = Vec::new();
    for part in rest.split('[').skip(1) {
        let index = part.strip_suffix(']')?;
        indices.push(index.parse().ok()?);
    }
    Some((key, indices))
}

/// Loads rule-scoped external data into the evaluation context.
///
/// Implementations resolve config maps, API calls, and variables named by
/// the rule's context manifest. They must be safe to share across
/// admission threads.
pub trait ContextLoader: Send + Sync {
    /// Load every entry into `ctx`, in declared order.
    fn load(
        &self,
        entries: &[ContextEntry],
        ctx: &mut EvalContext,
        cancel: &CancelToken,
    ) -> Result<(), EngineError>;
}

/// A loader for policies without context manifests; errors if a rule
/// declares entries it cannot resolve.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl ContextLoader for NoContext {
    fn load(
        &self,
        entries: &[ContextEntry],
        ctx: &mut EvalContext,
        _cancel: &CancelToken,
    ) -> Result<(), EngineError> {
        for entry in entries {
            match &entry.variable {
                Some(variable) => {
                    let value = if variable.value.is_null() {
                        variable.default.clone()
                    } else {
                        variable.value.clone()
                    };
                    ctx.add_variable(&entry.name, value);
                }
                None => {
                    return Err(EngineError::LoadContext(format!(
                        "no loader available for context entry `{}`",
                        entry.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Per-admission state owned by one request thread.
#[derive(Debug, Default)]
pub struct PolicyContext {
    old_resource: Value,
    new_resource: Value,
    ctx: EvalContext,
    cancel: CancelToken,
}

impl PolicyContext {
    /// Build a context for a create admission (no old resource).
    #[must_use]
    pub fn new(new_resource: Value) -> Self {
        Self {
            old_resource: Value::Null,
            new_resource,
            ctx: EvalContext::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Attach the prior state of the resource (update admissions).
    #[must_use]
    pub fn with_old_resource(mut self, old_resource: Value) -> Self {
        self.old_resource = old_resource;
        self
    }

    /// Attach a cancellation token (typically deadline-bearing).
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The incoming resource.
    #[must_use]
    pub fn new_resource(&self) -> &Value {
        &self.new_resource
    }

    /// The prior resource state (`Null` on create).
    #[must_use]
    pub fn old_resource(&self) -> &Value {
        &self.old_resource
    }

    /// The cancellation token for this admission.
    #[must_use]
    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    /// The evaluation context.
    #[must_use]
    pub fn eval_context(&self) -> &EvalContext {
        &self.ctx
    }

    /// The evaluation context, mutably.
    pub fn eval_context_mut(&mut self) -> &mut EvalContext {
        &mut self.ctx
    }

    /// Extract images with the default Pod-shaped walk.
    pub fn image_info(&self) -> Result<ExtractedImages, EngineError> {
        extract::default_images(&self.new_resource)
    }

    /// Extract images with rule-declared extractors.
    pub fn custom_image_info(
        &self,
        configs: &ImageExtractorConfigs,
    ) -> Result<ExtractedImages, EngineError> {
        extract::custom_images(&self.new_resource, configs)
    }

    /// Whether the value at an RFC-6901 pointer differs between the old
    /// and new resource. Errors when neither tree has a value there.
    pub fn has_changed(&self, pointer: &str) -> Result<bool, EngineError> {
        let new_value = self.new_resource.pointer(pointer);
        let old_value = self.old_resource.pointer(pointer);
        match (new_value, old_value) {
            (None, None) => Err(EngineError::PointerNotFound(pointer.to_owned())),
            (new_value, old_value) => Ok(new_value != old_value),
        }
    }
}
