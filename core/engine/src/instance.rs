//! Instance construction, lifecycle and management methods.
//!
//! The factory builds one engine context per instance, composes the API
//! tree, wraps it for context propagation and registers the instance in a
//! process-wide (thread-local) registry. The management surface
//! (`shutdown`, `addApi`, `removeApi`, `reload`, `describe`) is exposed both
//! as Rust methods on [`SlothletInstance`] and as non-enumerable methods on
//! the composite root.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use boa_engine::object::builtins::JsPromise;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, JsArgs, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction, Source,
};
use boa_gc::{Finalize, Gc, GcRefCell, Trace};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::builder::shape;
use crate::config::{
    AddApiOptions, ConfigSnapshot, Hook, Mode, RuntimeKind, SlothletOptions,
};
use crate::describe::{describe_value, DescribeNode};
use crate::error::{SlothletError, SlothletResult};
use crate::loader::SlothletModuleLoader;
use crate::meta::{make_metadata, resolve_dotted};
use crate::runtime::emitter::{self, EmitterPatch};
use crate::runtime::queue::FrameQueue;
use crate::runtime::{bindings, ContextFrame};
use crate::support::Support;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static REGISTRY: RefCell<FxHashMap<String, Gc<InstanceInner>>> =
        RefCell::new(FxHashMap::default());
}

/// Number of live instances on this thread. Diagnostics only.
pub fn live_instances() -> usize {
    REGISTRY.with(|registry| registry.borrow().len())
}

/// Records which caller attached a sub-API, so later removal and reload can
/// find and gate it.
#[derive(Debug, Clone)]
pub(crate) struct OwnershipEntry {
    pub api_path: String,
    pub module_id: Option<String>,
    pub source_dir: PathBuf,
    pub metadata: serde_json::Value,
    pub loaded_at: SystemTime,
}

/// A recorded `addApi` call, replayed by hot reload.
#[derive(Debug, Clone)]
struct AddApiRecord {
    path: String,
    dir: PathBuf,
    metadata: serde_json::Value,
    options: AddApiOptions,
}

/// Selector accepted by `removeApi`.
#[derive(Debug, Clone)]
pub enum RemoveApi {
    /// Remove the sub-API registered with this module id.
    ModuleId(String),
    /// Remove the sub-API mounted at this dotted path.
    Path(String),
}

/// Shared per-instance record. Everything the wrappers, bindings, queue and
/// management methods need at call time lives here.
#[derive(Trace, Finalize)]
pub(crate) struct InstanceInner {
    #[unsafe_ignore_trace]
    id: String,
    #[unsafe_ignore_trace]
    config: ConfigSnapshot,
    #[unsafe_ignore_trace]
    loader: Rc<SlothletModuleLoader>,
    #[unsafe_ignore_trace]
    queue: Rc<FrameQueue>,
    #[unsafe_ignore_trace]
    hooks: Vec<Hook>,
    #[unsafe_ignore_trace]
    shut_down: Cell<bool>,
    #[unsafe_ignore_trace]
    materialized: RefCell<FxHashSet<String>>,
    #[unsafe_ignore_trace]
    ownership: RefCell<Vec<OwnershipEntry>>,
    #[unsafe_ignore_trace]
    add_api_log: RefCell<Vec<AddApiRecord>>,

    support: Support,
    context_obj: JsObject,
    reference_obj: JsObject,
    api_root: GcRefCell<JsValue>,
    frames: GcRefCell<Vec<ContextFrame>>,
    live_frame: GcRefCell<Option<ContextFrame>>,
    pending_overlay: GcRefCell<Option<JsObject>>,
    emitter_patch: GcRefCell<Option<EmitterPatch>>,
    placeholders: GcRefCell<Vec<JsObject>>,
}

impl std::fmt::Debug for InstanceInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceInner")
            .field("id", &self.id)
            .field("mode", &self.config.mode)
            .field("shut_down", &self.shut_down.get())
            .finish_non_exhaustive()
    }
}

impl InstanceInner {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    pub(crate) fn mode(&self) -> Mode {
        self.config.mode
    }

    pub(crate) fn runtime_kind(&self) -> RuntimeKind {
        self.config.runtime
    }

    pub(crate) fn loader(&self) -> &SlothletModuleLoader {
        &self.loader
    }

    pub(crate) fn support(&self) -> &Support {
        &self.support
    }

    pub(crate) fn api_root(&self) -> JsValue {
        self.api_root.borrow().clone()
    }

    pub(crate) fn set_api_root(&self, root: JsValue) {
        *self.api_root.borrow_mut() = root;
    }

    pub(crate) fn context_object(&self) -> JsObject {
        self.context_obj.clone()
    }

    pub(crate) fn reference_object(&self) -> JsObject {
        self.reference_obj.clone()
    }

    pub(crate) fn frames(&self) -> &GcRefCell<Vec<ContextFrame>> {
        &self.frames
    }

    pub(crate) fn live_frame(&self) -> &GcRefCell<Option<ContextFrame>> {
        &self.live_frame
    }

    pub(crate) fn take_pending_overlay(&self) -> Option<JsObject> {
        self.pending_overlay.borrow_mut().take()
    }

    pub(crate) fn set_pending_overlay(&self, overlay: JsObject) {
        *self.pending_overlay.borrow_mut() = Some(overlay);
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.get()
    }

    pub(crate) fn run_hooks(
        &self,
        path: &str,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<()> {
        for hook in &self.hooks {
            if hook.matches(path) {
                (hook.observer)(path, args, context)?;
            }
        }
        Ok(())
    }

    pub(crate) fn mark_materialized(&self, path: &str) {
        self.materialized.borrow_mut().insert(path.to_owned());
    }

    pub(crate) fn register_placeholder(&self, proxy: JsObject) {
        self.placeholders.borrow_mut().push(proxy);
    }

    pub(crate) fn set_emitter_patch(&self, patch: EmitterPatch) {
        *self.emitter_patch.borrow_mut() = Some(patch);
    }

    pub(crate) fn take_emitter_patch(&self) -> Option<EmitterPatch> {
        self.emitter_patch.borrow_mut().take()
    }

    pub(crate) fn record_emitter_wrapper(
        &self,
        emitter: JsObject,
        event: JsString,
        wrapper: JsObject,
    ) {
        if let Some(patch) = &*self.emitter_patch.borrow() {
            patch.record_wrapper(emitter, event, wrapper);
        }
    }

    fn find_ownership(&self, path: &str) -> Option<OwnershipEntry> {
        self.ownership
            .borrow()
            .iter()
            .find(|entry| entry.api_path == path || path.starts_with(&format!("{}.", entry.api_path)))
            .cloned()
    }

    fn ensure_live(&self) -> SlothletResult<()> {
        if self.is_shut_down() {
            Err(SlothletError::Lifecycle(self.id.clone()))
        } else {
            Ok(())
        }
    }
}

/// The factory. Use [`Slothlet::builder`] or [`Slothlet::create`].
#[derive(Debug, Clone, Copy)]
pub struct Slothlet;

impl Slothlet {
    /// Starts building options for a module tree rooted at `dir`.
    pub fn builder(dir: impl Into<PathBuf>) -> SlothletBuilder {
        SlothletBuilder {
            options: SlothletOptions::new(dir),
        }
    }

    /// Creates an instance from fully assembled options.
    pub fn create(options: SlothletOptions) -> SlothletResult<SlothletInstance> {
        SlothletInstance::create(options)
    }
}

/// Fluent options builder mirroring [`SlothletOptions`].
#[derive(Debug)]
pub struct SlothletBuilder {
    options: SlothletOptions,
}

impl SlothletBuilder {
    /// Materialization mode.
    #[must_use]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.options.mode = mode;
        self
    }

    /// Depth cap for folder recursion.
    #[must_use]
    pub fn api_depth(mut self, depth: usize) -> Self {
        self.options.api_depth = Some(depth);
        self
    }

    /// Outer callable-vs-object policy.
    #[must_use]
    pub fn api_mode(mut self, api_mode: crate::config::ApiMode) -> Self {
        self.options.api_mode = api_mode;
        self
    }

    /// Context propagation implementation.
    #[must_use]
    pub fn runtime(mut self, runtime: RuntimeKind) -> Self {
        self.options.runtime = runtime;
        self
    }

    /// Whether `addApi` may replace foreign paths.
    #[must_use]
    pub fn allow_api_overwrite(mut self, allow: bool) -> Self {
        self.options.allow_api_overwrite = allow;
        self
    }

    /// Enables `reload`.
    #[must_use]
    pub fn hot_reload(mut self, enabled: bool) -> Self {
        self.options.hot_reload = enabled;
        self
    }

    /// Seed for the live `context` object.
    #[must_use]
    pub fn context(mut self, context: serde_json::Value) -> Self {
        self.options.context = context;
        self
    }

    /// Properties merged onto the root without overwriting loaded ones.
    #[must_use]
    pub fn reference(mut self, reference: serde_json::Value) -> Self {
        self.options.reference = reference;
        self
    }

    /// Sanitizer rule overrides.
    #[must_use]
    pub fn sanitizer(mut self, rules: crate::sanitize::SanitizerRules) -> Self {
        self.options.sanitizer = Some(rules);
        self
    }

    /// Adds a call observer hook.
    #[must_use]
    pub fn hook(mut self, hook: Hook) -> Self {
        self.options.hooks.push(hook);
        self
    }

    /// Builds the instance.
    pub fn build(self) -> SlothletResult<SlothletInstance> {
        SlothletInstance::create(self.options)
    }
}

/// A live slothlet instance: the engine context plus the composite API.
///
/// Not `Send`; drive it from the thread that created it.
#[derive(Debug)]
pub struct SlothletInstance {
    context: Context,
    inner: Gc<InstanceInner>,
}

impl SlothletInstance {
    fn create(options: SlothletOptions) -> SlothletResult<Self> {
        options.validate()?;
        let config = ConfigSnapshot::from_options(&options);
        let id = format!("slothlet-{}", NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed));

        let loader = Rc::new(SlothletModuleLoader::new(&options.dir));
        let queue = Rc::new(FrameQueue::new());
        let mut context = Context::builder()
            .module_loader(loader.clone())
            .job_queue(queue.clone())
            .build()
            .map_err(|e| SlothletError::load(&options.dir, &e))?;
        let engine_err = |e: &boa_engine::JsError| SlothletError::load(&options.dir, e);

        let support = Support::compile(&mut context).map_err(|e| engine_err(&e))?;
        let context_obj = seed_object(&options.context, &mut context).map_err(|e| engine_err(&e))?;
        let reference_obj =
            seed_object(&options.reference, &mut context).map_err(|e| engine_err(&e))?;

        let inner = Gc::new(InstanceInner {
            id: id.clone(),
            config,
            loader: loader.clone(),
            queue: queue.clone(),
            hooks: options.hooks.clone(),
            shut_down: Cell::new(false),
            materialized: RefCell::new(FxHashSet::default()),
            ownership: RefCell::new(Vec::new()),
            add_api_log: RefCell::new(Vec::new()),
            support,
            context_obj,
            reference_obj: reference_obj.clone(),
            api_root: GcRefCell::new(JsValue::undefined()),
            frames: GcRefCell::new(Vec::new()),
            live_frame: GcRefCell::new(None),
            pending_overlay: GcRefCell::new(None),
            emitter_patch: GcRefCell::new(None),
            placeholders: GcRefCell::new(Vec::new()),
        });
        queue.attach(inner.clone());

        let handles = emitter::install(&mut context).map_err(|e| engine_err(&e))?;

        let runtime_module = bindings::create_runtime_module(&inner, &handles.constructor, &mut context)
            .map_err(|e| engine_err(&e))?;
        loader.set_runtime_module(runtime_module);

        emitter::patch_propagation(&inner, &handles, &mut context).map_err(|e| engine_err(&e))?;

        let root = shape::build_root(&inner, &mut context)?;
        inner.set_api_root(root.clone());

        // Reference merge: property definition, never assignment, and never
        // over a loaded property.
        let reference_keys = inner
            .support()
            .enumerable_keys(&reference_obj.clone().into(), &mut context)
            .map_err(|e| engine_err(&e))?;
        for key in reference_keys {
            let value = reference_obj
                .get(JsString::from(key.as_str()), &mut context)
                .map_err(|e| engine_err(&e))?;
            inner
                .support()
                .define_if_absent(&root, &key, &value, &mut context)
                .map_err(|e| engine_err(&e))?;
        }

        attach_root_extras(&inner, &root, &mut context).map_err(|e| engine_err(&e))?;
        attach_management(&inner, &root, &mut context).map_err(|e| engine_err(&e))?;

        REGISTRY.with(|registry| {
            registry.borrow_mut().insert(id.clone(), inner.clone());
        });
        log::debug!(
            "created instance {id} over {} ({:?}, {:?})",
            options.dir.display(),
            inner.config.mode,
            inner.config.runtime
        );

        Ok(Self { context, inner })
    }

    /// Opaque instance id.
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    /// The composite API root.
    pub fn api(&self) -> JsValue {
        self.inner.api_root()
    }

    /// The engine context, for embedders that drive scripts directly.
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Evaluates a script in the instance's realm and drives pending jobs.
    pub fn eval(&mut self, source: &str) -> JsResult<JsValue> {
        let value = self.context.eval(Source::from_bytes(source))?;
        self.context.run_jobs();
        Ok(value)
    }

    /// Registers the composite root as a global property, typically `api`.
    pub fn expose_global(&mut self, name: &str) -> SlothletResult<()> {
        let root = self.inner.api_root();
        self.context
            .register_global_property(JsString::from(name), root, Attribute::all())
            .map_err(|e| SlothletError::Load {
                path: name.into(),
                message: e.to_string(),
            })
    }

    /// Calls the callable at `path` with `args`.
    pub fn call(&mut self, path: &str, args: &[JsValue]) -> SlothletResult<JsValue> {
        self.inner.ensure_live()?;
        let root = self.inner.api_root();
        let target = resolve_dotted(&root, path, &mut self.context).map_err(|e| {
            SlothletError::Load {
                path: path.into(),
                message: e.to_string(),
            }
        })?;
        let callable = target
            .as_object()
            .filter(|o| o.is_callable())
            .cloned()
            .ok_or_else(|| SlothletError::Load {
                path: path.into(),
                message: "path does not resolve to a callable".into(),
            })?;
        let result = callable
            .call(&JsValue::undefined(), args, &mut self.context)
            .map_err(|e| SlothletError::Load {
                path: path.into(),
                message: e.to_string(),
            })?;
        self.context.run_jobs();
        Ok(result)
    }

    /// Like [`call`](Self::call), but threads a per-request overlay that
    /// merges over the instance `context` for this call chain only.
    pub fn call_with_overlay(
        &mut self,
        path: &str,
        args: &[JsValue],
        overlay: &serde_json::Value,
    ) -> SlothletResult<JsValue> {
        let seed = seed_object(overlay, &mut self.context).map_err(|e| SlothletError::Load {
            path: path.into(),
            message: e.to_string(),
        })?;
        self.inner.set_pending_overlay(seed);
        self.call(path, args)
    }

    /// Attaches a sub-API loaded from `source_dir` at `path`.
    pub fn add_api(
        &mut self,
        path: &str,
        source_dir: impl Into<PathBuf>,
        metadata: serde_json::Value,
        options: AddApiOptions,
    ) -> SlothletResult<JsValue> {
        add_api_inner(
            &self.inner,
            &mut self.context,
            path,
            &source_dir.into(),
            metadata,
            options,
            true,
        )
    }

    /// Detaches a sub-API previously attached with [`add_api`](Self::add_api).
    pub fn remove_api(&mut self, selector: &RemoveApi) -> SlothletResult<()> {
        remove_api_inner(&self.inner, &mut self.context, selector)
    }

    /// Re-runs the loader over the root (or a sub-path), mutating the
    /// composite in place. Requires `hot_reload`.
    pub fn reload(&mut self, path: Option<&str>) -> SlothletResult<()> {
        reload_inner(&self.inner, &mut self.context, path)
    }

    /// Serializable tree of every reachable path.
    pub fn describe(&mut self) -> SlothletResult<DescribeNode> {
        self.inner.ensure_live()?;
        let root = self.inner.api_root();
        describe_value(&root, "", &self.inner, &mut self.context, 0)
    }

    /// Tears the instance down. Idempotent.
    pub fn shutdown(&mut self) -> SlothletResult<()> {
        shutdown_inner(&self.inner, &mut self.context)
    }
}

impl Drop for SlothletInstance {
    fn drop(&mut self) {
        if !self.inner.is_shut_down() {
            let _ = shutdown_inner(&self.inner, &mut self.context);
        }
    }
}

fn seed_object(seed: &serde_json::Value, context: &mut Context) -> JsResult<JsObject> {
    match seed {
        serde_json::Value::Null => Ok(JsObject::with_object_proto(context.intrinsics())),
        other => {
            let value = JsValue::from_json(other, context)?;
            value.as_object().cloned().ok_or_else(|| {
                JsNativeError::typ()
                    .with_message("seed value must be an object")
                    .into()
            })
        }
    }
}

/// Defines `__ctx`, `__metadata` and `__slothletPath` on the root.
fn attach_root_extras(
    inner: &Gc<InstanceInner>,
    root: &JsValue,
    context: &mut Context,
) -> JsResult<()> {
    let support = inner.support().clone();

    let ctx_handle = ObjectInitializer::new(context)
        .property(
            js_string!("id"),
            JsString::from(inner.id()),
            Attribute::ENUMERABLE,
        )
        .build();
    support.define_hidden(root, "__ctx", &ctx_handle.into(), context)?;

    let root_dir = inner.config().root_dir().display().to_string();
    let metadata = make_metadata(
        &[
            ("sourceFolder", JsString::from(root_dir.as_str()).into()),
            ("sourceFile", JsValue::undefined()),
            ("sourceLine", JsValue::undefined()),
        ],
        &support,
        context,
    )?;
    support.define_hidden(root, "__metadata", &metadata.into(), context)?;
    support.define_hidden(root, "__slothletPath", &js_string!("").into(), context)?;
    Ok(())
}

const MANAGEMENT_METHODS: [&str; 5] = ["shutdown", "addApi", "removeApi", "reload", "describe"];

#[derive(Debug, Trace, Finalize)]
struct ManagementCaptures {
    inner: Gc<InstanceInner>,
}

/// Attaches the management methods to the root as non-enumerable properties.
fn attach_management(
    inner: &Gc<InstanceInner>,
    root: &JsValue,
    context: &mut Context,
) -> JsResult<()> {
    let support = inner.support().clone();

    let shutdown_fn = unsafe { NativeFunction::from_closure_with_captures(
        |_, _args, captures, context| {
            shutdown_inner(&captures.inner, context)?;
            Ok(JsValue::undefined())
        },
        ManagementCaptures {
            inner: inner.clone(),
        },
    ) };

    let add_api_fn = unsafe { NativeFunction::from_closure_with_captures(
        |_, args, captures, context| {
            let path = args
                .get_or_undefined(0)
                .to_string(context)?
                .to_std_string_escaped();
            let dir = args
                .get_or_undefined(1)
                .to_string(context)?
                .to_std_string_escaped();
            let metadata = match args.get_or_undefined(2) {
                v if v.is_undefined() => serde_json::Value::Null,
                v => v.to_json(context)?,
            };
            let options = parse_add_api_options(args.get_or_undefined(3), context)?;
            let value = add_api_inner(
                &captures.inner,
                context,
                &path,
                Path::new(&dir),
                metadata,
                options,
                true,
            )?;
            Ok(JsPromise::resolve(value, context).into())
        },
        ManagementCaptures {
            inner: inner.clone(),
        },
    ) };

    let remove_api_fn = unsafe { NativeFunction::from_closure_with_captures(
        |_, args, captures, context| {
            let selector = parse_remove_selector(args.get_or_undefined(0), context)?;
            remove_api_inner(&captures.inner, context, &selector)?;
            Ok(JsValue::undefined())
        },
        ManagementCaptures {
            inner: inner.clone(),
        },
    ) };

    let reload_fn = unsafe { NativeFunction::from_closure_with_captures(
        |_, args, captures, context| {
            let path = args.get_or_undefined(0);
            let path = if path.is_undefined() {
                None
            } else {
                Some(path.to_string(context)?.to_std_string_escaped())
            };
            reload_inner(&captures.inner, context, path.as_deref())?;
            Ok(JsValue::undefined())
        },
        ManagementCaptures {
            inner: inner.clone(),
        },
    ) };

    let describe_fn = unsafe { NativeFunction::from_closure_with_captures(
        |_, _args, captures, context| {
            captures.inner.ensure_live()?;
            let root = captures.inner.api_root();
            let tree = describe_value(&root, "", &captures.inner, context, 0)?;
            let json = serde_json::to_value(&tree).map_err(|e| {
                JsNativeError::error().with_message(format!("describe serialization: {e}"))
            })?;
            JsValue::from_json(&json, context)
        },
        ManagementCaptures {
            inner: inner.clone(),
        },
    ) };

    for (name, function, length) in [
        ("shutdown", shutdown_fn, 0_usize),
        ("addApi", add_api_fn, 4),
        ("removeApi", remove_api_fn, 1),
        ("reload", reload_fn, 1),
        ("describe", describe_fn, 0),
    ] {
        let function = boa_engine::object::FunctionObjectBuilder::new(context.realm(), function)
            .name(JsString::from(name))
            .length(length)
            .build();
        support.define_hidden(root, name, &function.into(), context)?;
    }
    Ok(())
}

fn parse_add_api_options(value: &JsValue, context: &mut Context) -> JsResult<AddApiOptions> {
    let mut options = AddApiOptions::default();
    if let Some(object) = value.as_object() {
        options.force_overwrite = object
            .get(js_string!("forceOverwrite"), context)?
            .to_boolean();
        let module_id = object.get(js_string!("moduleId"), context)?;
        if !module_id.is_undefined() {
            options.module_id = Some(module_id.to_string(context)?.to_std_string_escaped());
        }
    }
    Ok(options)
}

fn parse_remove_selector(value: &JsValue, context: &mut Context) -> JsResult<RemoveApi> {
    if let Some(object) = value.as_object() {
        let module_id = object.get(js_string!("moduleId"), context)?;
        if !module_id.is_undefined() {
            return Ok(RemoveApi::ModuleId(
                module_id.to_string(context)?.to_std_string_escaped(),
            ));
        }
        let path = object.get(js_string!("path"), context)?;
        if !path.is_undefined() {
            return Ok(RemoveApi::Path(
                path.to_string(context)?.to_std_string_escaped(),
            ));
        }
    }
    Ok(RemoveApi::Path(
        value.to_string(context)?.to_std_string_escaped(),
    ))
}

fn add_api_inner(
    inner: &Gc<InstanceInner>,
    context: &mut Context,
    path: &str,
    source_dir: &Path,
    metadata: serde_json::Value,
    options: AddApiOptions,
    record: bool,
) -> SlothletResult<JsValue> {
    inner.ensure_live()?;
    if options.force_overwrite && !inner.config().hot_reload {
        return Err(SlothletError::Config(
            "`forceOverwrite` requires `hot_reload`".into(),
        ));
    }
    if !source_dir.is_dir() {
        return Err(SlothletError::Io {
            path: source_dir.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "source directory does not exist",
            ),
        });
    }
    if path.is_empty() {
        return Err(SlothletError::Config(
            "`addApi` requires a non-empty path".into(),
        ));
    }

    let root = inner.api_root();
    let existing = resolve_dotted(&root, path, context).map_err(|e| SlothletError::Load {
        path: path.into(),
        message: e.to_string(),
    })?;
    if !existing.is_undefined() {
        let owner = inner.find_ownership(path);
        let same_owner = matches!(
            (&owner, &options.module_id),
            (Some(entry), Some(id)) if entry.module_id.as_deref() == Some(id.as_str())
        );
        let allowed =
            inner.config().allow_api_overwrite || same_owner || options.force_overwrite;
        if !allowed {
            return Err(SlothletError::OwnershipDenied {
                path: path.to_owned(),
                owner: owner
                    .and_then(|entry| entry.module_id)
                    .unwrap_or_else(|| "<loaded tree>".into()),
            });
        }
    }

    let depth = path.split('.').count();
    let value = shape::build_folder(source_dir, depth, path, inner, context)?;

    // User metadata lands on the sub-tree's metadata object next to the
    // source fields.
    if value.as_object().is_some() {
        let support = inner.support().clone();
        let dir_string = source_dir.display().to_string();
        let mut fields: Vec<(String, JsValue)> = vec![(
            "sourceFolder".to_owned(),
            JsString::from(dir_string.as_str()).into(),
        )];
        if let serde_json::Value::Object(map) = &metadata {
            for (key, val) in map {
                let js = JsValue::from_json(val, context).map_err(|e| SlothletError::Load {
                    path: path.into(),
                    message: e.to_string(),
                })?;
                fields.push((key.clone(), js));
            }
        }
        let borrowed: Vec<(&str, JsValue)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        let meta_obj = make_metadata(&borrowed, &support, context).map_err(|e| {
            SlothletError::Load {
                path: path.into(),
                message: e.to_string(),
            }
        })?;
        support
            .define_hidden(&value, "__metadata", &meta_obj.into(), context)
            .map_err(|e| SlothletError::Load {
                path: path.into(),
                message: e.to_string(),
            })?;
    }

    attach_at_path(&root, path, &value, context)?;

    let entry = OwnershipEntry {
        api_path: path.to_owned(),
        module_id: options.module_id.clone(),
        source_dir: source_dir.to_path_buf(),
        metadata: metadata.clone(),
        loaded_at: SystemTime::now(),
    };
    inner
        .ownership
        .borrow_mut()
        .retain(|existing| existing.api_path != path);
    inner.ownership.borrow_mut().push(entry);

    if record {
        inner.add_api_log.borrow_mut().push(AddApiRecord {
            path: path.to_owned(),
            dir: source_dir.to_path_buf(),
            metadata,
            options,
        });
    }
    log::debug!("attached sub-api at {path} from {}", source_dir.display());
    Ok(value)
}

/// Sets `value` at the dotted `path`, creating intermediate plain objects.
fn attach_at_path(
    root: &JsValue,
    path: &str,
    value: &JsValue,
    context: &mut Context,
) -> SlothletResult<()> {
    let err = |e: &boa_engine::JsError| SlothletError::Load {
        path: path.into(),
        message: e.to_string(),
    };
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root
        .as_object()
        .cloned()
        .ok_or_else(|| SlothletError::Config("cannot attach onto a scalar root".into()))?;
    for segment in &segments[..segments.len() - 1] {
        let next = current
            .get(JsString::from(*segment), context)
            .map_err(|e| err(&e))?;
        current = match next.as_object() {
            Some(object) => object.clone(),
            None => {
                let fresh = JsObject::with_object_proto(context.intrinsics());
                current
                    .set(JsString::from(*segment), fresh.clone(), false, context)
                    .map_err(|e| err(&e))?;
                fresh
            }
        };
    }
    let last = segments[segments.len() - 1];
    current
        .set(JsString::from(last), value.clone(), false, context)
        .map_err(|e| err(&e))?;
    Ok(())
}

fn remove_api_inner(
    inner: &Gc<InstanceInner>,
    context: &mut Context,
    selector: &RemoveApi,
) -> SlothletResult<()> {
    inner.ensure_live()?;
    let path = {
        let ownership = inner.ownership.borrow();
        let entry = match selector {
            RemoveApi::ModuleId(id) => ownership
                .iter()
                .find(|entry| entry.module_id.as_deref() == Some(id.as_str())),
            RemoveApi::Path(path) => ownership.iter().find(|entry| &entry.api_path == path),
        };
        match entry {
            Some(entry) => entry.api_path.clone(),
            None => {
                return Err(SlothletError::OwnershipDenied {
                    path: match selector {
                        RemoveApi::ModuleId(id) => id.clone(),
                        RemoveApi::Path(path) => path.clone(),
                    },
                    owner: "<unregistered>".into(),
                })
            }
        }
    };

    let entry = {
        let ownership = inner.ownership.borrow();
        ownership
            .iter()
            .find(|entry| entry.api_path == path)
            .cloned()
    };

    let root = inner.api_root();
    let (parent_path, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (parent.to_owned(), last.to_owned()),
        None => (String::new(), path.clone()),
    };
    let parent = resolve_dotted(&root, &parent_path, context).map_err(|e| SlothletError::Load {
        path: path.clone().into(),
        message: e.to_string(),
    })?;
    inner
        .support()
        .delete_prop(&parent, &last, context)
        .map_err(|e| SlothletError::Load {
            path: path.clone().into(),
            message: e.to_string(),
        })?;

    inner
        .ownership
        .borrow_mut()
        .retain(|entry| entry.api_path != path);
    inner
        .add_api_log
        .borrow_mut()
        .retain(|record| record.path != path);
    if let Some(entry) = entry {
        log::debug!(
            "removed sub-api at {path} (module {:?}, loaded at {:?}, {} metadata fields)",
            entry.module_id,
            entry.loaded_at,
            entry
                .metadata
                .as_object()
                .map_or(0, serde_json::Map::len)
        );
    }
    Ok(())
}

fn reload_inner(
    inner: &Gc<InstanceInner>,
    context: &mut Context,
    path: Option<&str>,
) -> SlothletResult<()> {
    inner.ensure_live()?;
    if !inner.config().hot_reload {
        return Err(SlothletError::Config(
            "`reload` requires `hot_reload` to be enabled".into(),
        ));
    }

    let root = inner.api_root();
    match path {
        None => {
            inner.loader().invalidate(inner.config().root_dir());
            log::debug!(
                "dropping {} materialized sub-trees for reload",
                inner.materialized.borrow().len()
            );
            inner.placeholders.borrow_mut().clear();
            inner.materialized.borrow_mut().clear();

            let fresh = shape::build_root(inner, context)?;
            let was_callable = root.as_object().is_some_and(JsObject::is_callable);
            let is_callable = fresh.as_object().is_some_and(JsObject::is_callable);
            if was_callable != is_callable {
                return Err(SlothletError::Config(
                    "hot reload cannot change the root between callable and object".into(),
                ));
            }
            inner
                .support()
                .reconcile(&root, &fresh, context)
                .map_err(|e| SlothletError::Load {
                    path: inner.config().root_dir().to_path_buf(),
                    message: e.to_string(),
                })?;

            // Dynamic extensions survive reload: replay the add-api log.
            let records: Vec<AddApiRecord> = inner.add_api_log.borrow().clone();
            for record in records {
                add_api_inner(
                    inner,
                    context,
                    &record.path,
                    &record.dir,
                    record.metadata.clone(),
                    record.options.clone(),
                    false,
                )?;
            }
            log::debug!("reloaded instance {} in place", inner.id());
            Ok(())
        }
        Some(sub_path) => {
            let source_dir = inner
                .find_ownership(sub_path)
                .map(|entry| entry.source_dir)
                .unwrap_or_else(|| {
                    let mut dir = inner.config().root_dir().to_path_buf();
                    for segment in sub_path.split('.') {
                        dir.push(segment);
                    }
                    dir
                });
            if !source_dir.is_dir() {
                return Err(SlothletError::Io {
                    path: source_dir,
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "reload path has no backing directory",
                    ),
                });
            }
            inner.loader().invalidate(&source_dir);
            let depth = sub_path.split('.').count();
            let fresh = shape::build_folder(&source_dir, depth, sub_path, inner, context)?;

            let existing =
                resolve_dotted(&root, sub_path, context).map_err(|e| SlothletError::Load {
                    path: sub_path.into(),
                    message: e.to_string(),
                })?;
            let both_objects = existing.as_object().is_some_and(|o| !o.is_callable())
                && fresh.as_object().is_some_and(|o| !o.is_callable());
            if both_objects {
                inner
                    .support()
                    .reconcile(&existing, &fresh, context)
                    .map_err(|e| SlothletError::Load {
                        path: sub_path.into(),
                        message: e.to_string(),
                    })?;
            } else {
                attach_at_path(&root, sub_path, &fresh, context)?;
            }
            log::debug!("reloaded {sub_path} for instance {}", inner.id());
            Ok(())
        }
    }
}

fn shutdown_inner(inner: &Gc<InstanceInner>, context: &mut Context) -> SlothletResult<()> {
    if inner.is_shut_down() {
        // Second shutdown returns the same resolved state.
        return Ok(());
    }

    emitter::unpatch_propagation(inner, context).map_err(|e| SlothletError::Load {
        path: inner.config().root_dir().to_path_buf(),
        message: e.to_string(),
    })?;

    let root = inner.api_root();
    if root.as_object().is_some() {
        let support = inner.support().clone();
        for name in MANAGEMENT_METHODS {
            let _ = support.delete_prop(&root, name, context);
        }
    }

    inner.loader().clear();
    inner.queue.detach();
    inner.frames.borrow_mut().clear();
    *inner.live_frame.borrow_mut() = None;
    *inner.pending_overlay.borrow_mut() = None;
    inner.placeholders.borrow_mut().clear();
    inner.materialized.borrow_mut().clear();

    REGISTRY.with(|registry| {
        registry.borrow_mut().remove(inner.id());
    });
    inner.shut_down.set(true);
    log::debug!("instance {} shut down", inner.id());
    Ok(())
}
