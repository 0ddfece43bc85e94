//! Sync coordinator.
//!
//! Consumes host notifications from a channel, keeps the tracked glass
//! element in sync with the geometry it observes, and drives render cycles
//! (singly or as an interruptible batch). Everything runs on one logical
//! thread; the only state shared with [`SyncHandle`]s is a set of flags.

use crate::config::{AppConfig, RecapturePolicy};
use crate::pipeline::{CycleResult, RenderCycle, RenderedGlass};
use crate::protocol::{encode_data_url, ImageCaptured, Inbound, Outbound};
use crate::writeback::WriteBack;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use image::RgbaImage;
use kurbo::Rect;
use lucent_core::{
    classify, BoxFuture, EffectParameters, GeometrySnapshot, NodeId, ParameterSummary, SceneHost, SceneNode,
    SceneResult, ShapeSummary, SyncState, Viewport,
};
use lucent_render::{CompositorError, OpticalCompositor};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Flags {
    interrupt: AtomicBool,
    batch_running: AtomicBool,
    /// Depth of open write windows. Non-zero only while the coordinator is
    /// synchronously mutating the document.
    writing: AtomicUsize,
}

impl Flags {
    fn is_writing(&self) -> bool {
        self.writing.load(Ordering::SeqCst) > 0
    }
}

/// Sending side of a coordinator, handed to host callbacks.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    sender: UnboundedSender<Inbound>,
    flags: Arc<Flags>,
}

impl SyncHandle {
    /// Queue an event. Returns false once the coordinator is gone.
    ///
    /// An `Interrupt` also takes effect immediately, since a running batch
    /// does not read the queue.
    pub fn send(&self, event: Inbound) -> bool {
        if event == Inbound::Interrupt {
            self.interrupt();
        }
        self.sender.unbounded_send(event).is_ok()
    }

    pub fn selection_changed(&self, selection: Vec<NodeId>) -> bool {
        self.send(Inbound::SelectionChanged { selection })
    }

    /// Report a document edit.
    ///
    /// Changes raised from inside one of the coordinator's own write windows
    /// are dropped. Anything else is queued, and stops a running batch.
    /// Edits arriving while a capture is suspended are user edits and are
    /// kept; the tracked geometry decides later whether they matter.
    pub fn document_changed(&self, nodes: Vec<NodeId>) -> bool {
        if self.flags.is_writing() {
            log::trace!("Ignoring self-inflicted change to {:?}", nodes);
            return false;
        }
        if self.flags.batch_running.load(Ordering::SeqCst) {
            self.interrupt();
        }
        self.send(Inbound::DocumentChanged { nodes })
    }

    /// Stop a running batch after its current item.
    pub fn interrupt(&self) {
        if self.flags.batch_running.load(Ordering::SeqCst) {
            log::info!("Interrupting batch update");
        }
        self.flags.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn is_batch_running(&self) -> bool {
        self.flags.batch_running.load(Ordering::SeqCst)
    }
}

/// An open write window. Closes when dropped.
struct Writing(Arc<Flags>);

impl Writing {
    fn start(flags: &Arc<Flags>) -> Self {
        flags.writing.fetch_add(1, Ordering::SeqCst);
        Self(flags.clone())
    }
}

impl Drop for Writing {
    fn drop(&mut self) {
        self.0.writing.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The host as seen by the coordinator: every synchronous mutation runs
/// inside a write window, reads and suspending calls pass straight through.
struct ScopedHost<'a, H: SceneHost + ?Sized> {
    inner: &'a H,
    flags: Arc<Flags>,
}

impl<H: SceneHost + ?Sized> Clone for ScopedHost<'_, H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner,
            flags: self.flags.clone(),
        }
    }
}

impl<H: SceneHost + ?Sized> ScopedHost<'_, H> {
    fn write<T>(&self, f: impl FnOnce(&H) -> T) -> T {
        let _writing = Writing::start(&self.flags);
        f(self.inner)
    }
}

impl<H: SceneHost + ?Sized> SceneHost for ScopedHost<'_, H> {
    fn page(&self) -> NodeId {
        self.inner.page()
    }

    fn node(&self, id: NodeId) -> Option<SceneNode> {
        self.inner.node(id)
    }

    fn set_opacity(&self, id: NodeId, opacity: f64) -> SceneResult<()> {
        self.write(|h| h.set_opacity(id, opacity))
    }

    fn set_effect_parameters(&self, id: NodeId, params: EffectParameters) -> SceneResult<()> {
        self.write(|h| h.set_effect_parameters(id, params))
    }

    fn selection(&self) -> Vec<NodeId> {
        self.inner.selection()
    }

    fn set_selection(&self, nodes: &[NodeId]) -> SceneResult<()> {
        self.write(|h| h.set_selection(nodes))
    }

    fn viewport(&self) -> Viewport {
        self.inner.viewport()
    }

    fn set_viewport(&self, viewport: Viewport) -> SceneResult<()> {
        self.write(|h| h.set_viewport(viewport))
    }

    fn rasterize(&self, rect: Rect) -> BoxFuture<'_, SceneResult<RgbaImage>> {
        self.inner.rasterize(rect)
    }

    fn export_outline(&self, id: NodeId) -> BoxFuture<'_, SceneResult<String>> {
        self.inner.export_outline(id)
    }

    fn pause(&self, duration: Duration) -> BoxFuture<'_, ()> {
        self.inner.pause(duration)
    }

    fn glass_nodes_under(&self, roots: &[NodeId]) -> Vec<NodeId> {
        self.inner.glass_nodes_under(roots)
    }
}

/// Batch bookkeeping. Restores viewport and selection and clears the batch
/// flags when dropped, so a cancelled or panicking batch cleans up too.
struct BatchScope<'a, H: SceneHost + ?Sized> {
    host: ScopedHost<'a, H>,
    viewport: Viewport,
    selection: Vec<NodeId>,
}

impl<'a, H: SceneHost + ?Sized> BatchScope<'a, H> {
    fn begin(host: ScopedHost<'a, H>) -> Self {
        host.flags.interrupt.store(false, Ordering::SeqCst);
        host.flags.batch_running.store(true, Ordering::SeqCst);
        let viewport = host.viewport();
        let selection = host.selection();
        Self {
            host,
            viewport,
            selection,
        }
    }

    fn interrupted(&self) -> bool {
        self.host.flags.interrupt.load(Ordering::SeqCst)
    }
}

impl<H: SceneHost + ?Sized> Drop for BatchScope<'_, H> {
    fn drop(&mut self) {
        if let Err(e) = self.host.set_viewport(self.viewport) {
            log::error!("Failed to restore viewport: {}", e);
        }
        if let Err(e) = self.host.set_selection(&self.selection) {
            log::error!("Failed to restore selection: {}", e);
        }
        self.host.flags.batch_running.store(false, Ordering::SeqCst);
        self.host.flags.interrupt.store(false, Ordering::SeqCst);
    }
}

/// How a batch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Completed,
    Interrupted,
    Failed { node: NodeId, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub total: usize,
    pub completed: usize,
    /// Items never started.
    pub skipped: usize,
    pub outcome: BatchOutcome,
}

/// The coordinator. Owns the compositor and the tracking state.
pub struct SyncCoordinator<'a, H: SceneHost + ?Sized, W: WriteBack + ?Sized> {
    host: ScopedHost<'a, H>,
    write_back: &'a W,
    compositor: OpticalCompositor,
    config: AppConfig,
    state: SyncState,
    flags: Arc<Flags>,
    events: UnboundedReceiver<Inbound>,
    pending: VecDeque<Inbound>,
}

impl<'a, H: SceneHost + ?Sized, W: WriteBack + ?Sized> SyncCoordinator<'a, H, W> {
    /// Create a coordinator and the handle feeding it.
    ///
    /// Fails if the glass program does not compile or link; no render can
    /// happen in that case.
    pub fn new(host: &'a H, write_back: &'a W, config: AppConfig) -> Result<(Self, SyncHandle), CompositorError> {
        let compositor = OpticalCompositor::new()?;
        let (sender, events) = mpsc::unbounded();
        let flags = Arc::new(Flags::default());
        let handle = SyncHandle {
            sender,
            flags: flags.clone(),
        };
        let coordinator = Self {
            host: ScopedHost {
                inner: host,
                flags: flags.clone(),
            },
            write_back,
            compositor,
            config,
            state: SyncState::new(),
            flags,
            events,
            pending: VecDeque::new(),
        };
        Ok((coordinator, handle))
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Process events until every handle is dropped.
    pub async fn run(&mut self) {
        while let Some(event) = self.next_event().await {
            self.handle(event).await;
        }
        log::info!("Event stream closed");
    }

    /// Process every event already queued, including those raised while
    /// handling, without waiting for more.
    pub async fn run_pending(&mut self) {
        loop {
            self.drain_queued();
            self.pending = coalesce(std::mem::take(&mut self.pending));
            let Some(event) = self.pending.pop_front() else {
                break;
            };
            self.handle(event).await;
        }
    }

    async fn next_event(&mut self) -> Option<Inbound> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        let first = self.events.next().await?;
        self.pending.push_back(first);
        self.drain_queued();
        self.pending = coalesce(std::mem::take(&mut self.pending));
        self.pending.pop_front()
    }

    fn drain_queued(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.pending.push_back(event);
        }
    }

    /// Handle one event.
    pub async fn handle(&mut self, event: Inbound) {
        log::debug!("Handling {:?}", event);
        match event {
            Inbound::Render { node } => {
                self.render_reporting(node).await;
            }
            Inbound::Batch { roots } => {
                self.batch(roots).await;
            }
            Inbound::Interrupt => {
                if !self.flags.batch_running.load(Ordering::SeqCst) {
                    log::debug!("Interrupt with no batch running");
                }
            }
            Inbound::SelectionChanged { selection } => self.selection_changed(&selection).await,
            Inbound::DocumentChanged { nodes } => self.document_changed(&nodes).await,
            Inbound::ParametersChanged { nodes, params } => self.parameters_changed(nodes, params).await,
        }
    }

    async fn emit(&self, message: Outbound) {
        if let Err(e) = self.write_back.deliver(message).await {
            log::error!("Write-back failed: {}", e);
        }
    }

    /// Run one cycle for `node` and write the result back.
    pub async fn render_node(&mut self, node: NodeId) -> CycleResult<RenderedGlass> {
        let glass = RenderCycle::run(&self.host, &mut self.compositor, node).await?;
        if glass.degraded {
            self.emit(Outbound::notify("Failed to process complex shape, using its bounding box"))
                .await;
        }

        let bitmap = encode_data_url(&glass.image)?;
        let captured = Outbound::ImageCaptured(ImageCaptured {
            node,
            bitmap,
            shape: glass.rendered,
            shape_kind: glass.shape_kind(),
            distance_field_source: glass.distance_field_source.clone(),
        });
        {
            let _writing = Writing::start(&self.flags);
            self.write_back.deliver(captured).await?;
        }
        log::info!("Rendered glass {} ({})", node, glass.shape_kind().name());
        Ok(glass)
    }

    async fn render_reporting(&mut self, node: NodeId) -> bool {
        match self.render_node(node).await {
            Ok(_) => true,
            Err(e) => {
                log::error!("Render of {} failed: {}", node, e);
                self.emit(Outbound::RenderFailed {
                    node: Some(node),
                    reason: e.to_string(),
                })
                .await;
                false
            }
        }
    }

    async fn selection_changed(&mut self, selection: &[NodeId]) {
        let glass: Vec<SceneNode> = selection
            .iter()
            .filter_map(|&id| self.host.node(id))
            .filter(SceneNode::is_eligible)
            .collect();

        match glass.as_slice() {
            [node] if selection.len() == 1 => {
                if self.state.is_tracking(node.id) {
                    return;
                }
                log::info!("Tracking glass {} ({})", node.id, node.name);
                self.state.track(node.id, GeometrySnapshot::from_node(node));
                self.render_reporting(node.id).await;
            }
            nodes if nodes.len() >= 2 => {
                self.state.clear();
                let descriptors: Vec<_> = nodes.iter().map(classify).collect();
                let params: Vec<EffectParameters> = nodes.iter().filter_map(|n| n.glass).collect();
                if let (Some(shapes), Some(params)) =
                    (ShapeSummary::summarize(&descriptors), ParameterSummary::from_params(&params))
                {
                    self.emit(Outbound::SelectionSummary { shapes, params }).await;
                }
            }
            _ => {
                if let Some(node) = self.state.tracked_node() {
                    log::debug!("Stopped tracking {}", node);
                }
                self.state.clear();
            }
        }
    }

    async fn document_changed(&mut self, nodes: &[NodeId]) {
        let Some(tracked) = self.state.tracked_node() else {
            return;
        };
        if !nodes.contains(&tracked) {
            return;
        }
        let Some(node) = self.host.node(tracked).filter(SceneNode::is_eligible) else {
            log::info!("Tracked glass {} is gone", tracked);
            self.state.clear();
            return;
        };
        if !self.state.observe(tracked, GeometrySnapshot::from_node(&node)) {
            log::trace!("Geometry of {} unchanged", tracked);
            return;
        }

        match self.config.recapture {
            RecapturePolicy::Immediate => {
                self.render_reporting(tracked).await;
            }
            RecapturePolicy::Debounced { quiet_period_ms } => {
                self.emit(Outbound::Placeholder { node: tracked }).await;
                loop {
                    self.host.pause(Duration::from_millis(quiet_period_ms)).await;
                    self.drain_queued();
                    if !take_changes_for(&mut self.pending, tracked) {
                        break;
                    }
                }
                if let Some(node) = self.host.node(tracked) {
                    self.state.observe(tracked, GeometrySnapshot::from_node(&node));
                }
                self.render_reporting(tracked).await;
            }
        }
    }

    async fn parameters_changed(&mut self, nodes: Vec<NodeId>, params: EffectParameters) {
        let candidates = if nodes.is_empty() { self.host.selection() } else { nodes };
        let targets: Vec<NodeId> = candidates
            .into_iter()
            .filter(|&id| self.host.node(id).is_some_and(|n| n.is_eligible()))
            .collect();
        if targets.is_empty() {
            self.emit(Outbound::notify("No eligible shapes found")).await;
            return;
        }

        for node in targets {
            match self.host.set_effect_parameters(node, params) {
                Ok(()) => {
                    self.render_reporting(node).await;
                }
                Err(e) => {
                    self.emit(Outbound::RenderFailed {
                        node: Some(node),
                        reason: e.to_string(),
                    })
                    .await
                }
            }
        }
    }

    /// Re-render every glass element under `roots`, or the whole page.
    pub async fn batch(&mut self, roots: Vec<NodeId>) -> BatchReport {
        let roots = if roots.is_empty() { vec![self.host.page()] } else { roots };
        let targets = self.host.glass_nodes_under(&roots);
        if targets.is_empty() {
            self.emit(Outbound::notify("No eligible shapes found")).await;
            return BatchReport {
                total: 0,
                completed: 0,
                skipped: 0,
                outcome: BatchOutcome::Completed,
            };
        }
        self.run_batch(&targets).await
    }

    /// Render `targets` in order, pausing between items.
    ///
    /// Checks the interrupt flag before each item. Viewport and selection
    /// are restored however the batch ends, including when the future is
    /// dropped mid-item or a host call panics.
    pub async fn run_batch(&mut self, targets: &[NodeId]) -> BatchReport {
        let scope = BatchScope::begin(self.host.clone());
        let zoom = scope.viewport.zoom;
        let total = targets.len();
        log::info!("Batch update of {} glass elements", total);

        let mut completed = 0;
        let mut outcome = BatchOutcome::Completed;
        for (index, &node) in targets.iter().enumerate() {
            if scope.interrupted() {
                outcome = BatchOutcome::Interrupted;
                break;
            }

            let snapshot = self.host.node(node);
            let name = snapshot.as_ref().map_or_else(|| node.to_string(), |n| n.name.clone());
            self.emit(Outbound::notify(format!("Updating {} of {}: {}", index + 1, total, name)))
                .await;
            self.focus(node, snapshot.as_ref().and_then(SceneNode::absolute_bounds), zoom);

            match self.render_node(node).await {
                Ok(_) => completed += 1,
                Err(e) => {
                    log::error!("Batch item {} failed: {}", name, e);
                    outcome = BatchOutcome::Failed {
                        node,
                        reason: e.to_string(),
                    };
                    break;
                }
            }

            if index + 1 < total {
                self.host.pause(self.config.batch_pause()).await;
            }
        }

        drop(scope);

        let failed = usize::from(matches!(outcome, BatchOutcome::Failed { .. }));
        let report = BatchReport {
            total,
            completed,
            skipped: total - completed - failed,
            outcome,
        };
        let message = match &report.outcome {
            BatchOutcome::Completed => format!("Updated {} glass elements", completed),
            BatchOutcome::Interrupted => format!("Update stopped: {} of {} glass elements updated", completed, total),
            BatchOutcome::Failed { reason, .. } => format!("Update stopped: {}", reason),
        };
        log::info!("{}", message);
        if let BatchOutcome::Failed { node, reason } = &report.outcome {
            self.emit(Outbound::RenderFailed {
                node: Some(*node),
                reason: reason.clone(),
            })
            .await;
        }
        self.emit(Outbound::notify(message)).await;
        report
    }

    /// Select `node` and centre the viewport on it.
    fn focus(&self, node: NodeId, bounds: Option<Rect>, zoom: f64) {
        if let Err(e) = self.host.set_selection(&[node]) {
            log::warn!("Could not select {}: {}", node, e);
        }
        if let Some(bounds) = bounds {
            let viewport = Viewport {
                center: bounds.center(),
                zoom,
            };
            if let Err(e) = self.host.set_viewport(viewport) {
                log::warn!("Could not move viewport to {}: {}", node, e);
            }
        }
    }
}

/// Merge a drained run of events.
///
/// Repeated geometry notifications for a node collapse into the first one,
/// and consecutive selection changes collapse into the last one. Any other
/// event keeps its position and ends the merge window.
fn coalesce(events: VecDeque<Inbound>) -> VecDeque<Inbound> {
    let mut out = VecDeque::with_capacity(events.len());
    let mut seen: HashSet<NodeId> = HashSet::new();
    for event in events {
        match event {
            Inbound::DocumentChanged { nodes } => {
                let fresh: Vec<NodeId> = nodes.into_iter().filter(|n| seen.insert(*n)).collect();
                if !fresh.is_empty() {
                    out.push_back(Inbound::DocumentChanged { nodes: fresh });
                }
            }
            Inbound::SelectionChanged { selection } => {
                if matches!(out.back(), Some(Inbound::SelectionChanged { .. })) {
                    out.pop_back();
                }
                seen.clear();
                out.push_back(Inbound::SelectionChanged { selection });
            }
            other => {
                seen.clear();
                out.push_back(other);
            }
        }
    }
    out
}

/// Remove `node` from queued geometry notifications. True if any
/// mentioned it.
fn take_changes_for(pending: &mut VecDeque<Inbound>, node: NodeId) -> bool {
    let mut found = false;
    pending.retain_mut(|event| match event {
        Inbound::DocumentChanged { nodes } => {
            let before = nodes.len();
            nodes.retain(|&n| n != node);
            found |= nodes.len() != before;
            !nodes.is_empty()
        }
        _ => true,
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writeback::Recorder;
    use lucent_core::{MemoryScene, NodeSpec, Primitive, SerializableColor, ShapeKind, Uniform};
    use std::cell::Cell;
    use std::panic::AssertUnwindSafe;
    use std::rc::Rc;
    use uuid::Uuid;

    fn scene() -> (MemoryScene, NodeId, NodeId) {
        let scene = MemoryScene::new(SerializableColor::new(200, 200, 200, 255));
        let root = scene.root();
        let a = scene.add_node(
            root,
            NodeSpec::new("a", Primitive::Rectangle, 10.0, 10.0, 60.0, 40.0)
                .with_corner_radius(10.0)
                .with_glass(EffectParameters::default()),
        );
        let b = scene.add_node(
            root,
            NodeSpec::new("b", Primitive::Ellipse, 100.0, 10.0, 60.0, 40.0)
                .with_glass(EffectParameters::new(20.0, 30.0, 5.0, 0.0)),
        );
        (scene, a, b)
    }

    fn captured(recorder: &Recorder<'_, MemoryScene>) -> Vec<NodeId> {
        recorder
            .delivered()
            .into_iter()
            .filter_map(|m| match m {
                Outbound::ImageCaptured(c) => Some(c.node),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_selection_tracks_and_renders_once() {
        let (scene, a, _) = scene();
        let recorder = Recorder::new(&scene);
        let (mut coordinator, handle) = SyncCoordinator::new(&scene, &recorder, AppConfig::default()).unwrap();

        handle.selection_changed(vec![a]);
        handle.selection_changed(vec![a]);
        drop(handle);
        pollster::block_on(coordinator.run());

        assert_eq!(coordinator.state().tracked_node(), Some(a));
        assert_eq!(captured(&recorder), vec![a]);
        assert_eq!(scene.fill_image(a).map(|i| i.dimensions()), Some((60, 40)));
    }

    #[test]
    fn test_geometry_change_rerenders() {
        let (scene, a, _) = scene();
        let recorder = Recorder::new(&scene);
        let (mut coordinator, handle) = SyncCoordinator::new(&scene, &recorder, AppConfig::default()).unwrap();

        pollster::block_on(coordinator.handle(Inbound::SelectionChanged { selection: vec![a] }));
        // Unchanged geometry: nothing to do.
        pollster::block_on(coordinator.handle(Inbound::DocumentChanged { nodes: vec![a] }));
        assert_eq!(captured(&recorder).len(), 1);

        scene.set_position(a, 20.0, 10.0).unwrap();
        pollster::block_on(coordinator.handle(Inbound::DocumentChanged { nodes: vec![a] }));
        scene.set_corner_radius(a, Uniform::Single(4.0)).unwrap();
        pollster::block_on(coordinator.handle(Inbound::DocumentChanged { nodes: vec![a] }));
        assert_eq!(captured(&recorder).len(), 3);
        drop(handle);
    }

    #[test]
    fn test_queued_changes_coalesce() {
        let (scene, a, b) = scene();
        let recorder = Recorder::new(&scene);
        let (mut coordinator, handle) = SyncCoordinator::new(&scene, &recorder, AppConfig::default()).unwrap();
        pollster::block_on(coordinator.handle(Inbound::SelectionChanged { selection: vec![a] }));

        scene.set_position(a, 30.0, 10.0).unwrap();
        for _ in 0..5 {
            handle.document_changed(vec![a, b]);
        }
        drop(handle);
        pollster::block_on(coordinator.run());
        assert_eq!(captured(&recorder), vec![a, a]);
    }

    #[test]
    fn test_deselection_and_ineligible_selection_go_idle() {
        let (scene, a, _) = scene();
        let plain = scene.add_node(scene.root(), NodeSpec::new("plain", Primitive::Rectangle, 0.0, 0.0, 5.0, 5.0));
        let recorder = Recorder::new(&scene);
        let (mut coordinator, _handle) = SyncCoordinator::new(&scene, &recorder, AppConfig::default()).unwrap();

        pollster::block_on(coordinator.handle(Inbound::SelectionChanged { selection: vec![a] }));
        pollster::block_on(coordinator.handle(Inbound::SelectionChanged { selection: vec![plain] }));
        assert!(coordinator.state().tracked().is_none());

        pollster::block_on(coordinator.handle(Inbound::SelectionChanged { selection: vec![a] }));
        pollster::block_on(coordinator.handle(Inbound::SelectionChanged { selection: Vec::new() }));
        assert!(coordinator.state().tracked().is_none());

        // Edits while idle render nothing.
        scene.set_position(a, 0.0, 0.0).unwrap();
        pollster::block_on(coordinator.handle(Inbound::DocumentChanged { nodes: vec![a] }));
        assert_eq!(captured(&recorder).len(), 2);
    }

    #[test]
    fn test_multi_selection_posts_summary() {
        let (scene, a, b) = scene();
        let recorder = Recorder::new(&scene);
        let (mut coordinator, _handle) = SyncCoordinator::new(&scene, &recorder, AppConfig::default()).unwrap();

        pollster::block_on(coordinator.handle(Inbound::SelectionChanged { selection: vec![a, b] }));
        assert!(coordinator.state().tracked().is_none());

        let summary = recorder.delivered().into_iter().find_map(|m| match m {
            Outbound::SelectionSummary { shapes, params } => Some((shapes, params)),
            _ => None,
        });
        let (shapes, params) = summary.unwrap();
        assert_eq!(shapes.count, 2);
        assert_eq!(shapes.width, Uniform::Single(60.0));
        assert!(shapes.kind.is_heterogeneous());
        assert_eq!(params.edge_thickness, Uniform::Single(20.0));
        assert!(params.refraction_strength.is_heterogeneous());
    }

    #[test]
    fn test_debounced_recapture_posts_placeholder() {
        let (scene, a, _) = scene();
        let recorder = Recorder::new(&scene);
        let config = AppConfig {
            recapture: RecapturePolicy::Debounced { quiet_period_ms: 250 },
            ..AppConfig::default()
        };
        let (mut coordinator, _handle) = SyncCoordinator::new(&scene, &recorder, config).unwrap();

        pollster::block_on(coordinator.handle(Inbound::SelectionChanged { selection: vec![a] }));
        scene.set_position(a, 40.0, 40.0).unwrap();
        pollster::block_on(coordinator.handle(Inbound::DocumentChanged { nodes: vec![a] }));

        let delivered = recorder.delivered();
        assert!(matches!(delivered[1], Outbound::Placeholder { node } if node == a));
        assert!(matches!(delivered[2], Outbound::ImageCaptured(_)));
        assert_eq!(scene.pauses(), vec![Duration::from_millis(250)]);
    }

    #[test]
    fn test_parameters_changed_updates_and_renders() {
        let (scene, a, b) = scene();
        let recorder = Recorder::new(&scene);
        let (mut coordinator, _handle) = SyncCoordinator::new(&scene, &recorder, AppConfig::default()).unwrap();

        scene.set_selection(&[a, b]).unwrap();
        let params = EffectParameters::new(5.0, 5.0, 0.0, 1.0);
        pollster::block_on(coordinator.handle(Inbound::ParametersChanged {
            nodes: Vec::new(),
            params,
        }));
        assert_eq!(scene.node(a).unwrap().glass, Some(params));
        assert_eq!(scene.node(b).unwrap().glass, Some(params));
        assert_eq!(captured(&recorder), vec![a, b]);
    }

    #[test]
    fn test_render_failure_is_reported() {
        let (scene, a, _) = scene();
        let recorder = Recorder::new(&scene);
        let (mut coordinator, _handle) = SyncCoordinator::new(&scene, &recorder, AppConfig::default()).unwrap();

        scene.fail_next_rasterize();
        pollster::block_on(coordinator.handle(Inbound::Render { node: a }));
        assert!(matches!(
            recorder.delivered().as_slice(),
            [Outbound::RenderFailed { node: Some(n), .. }] if *n == a
        ));
        assert_eq!(scene.node(a).unwrap().opacity, 1.0);
    }

    #[test]
    fn test_batch_failure_restores_view() {
        let (scene, a, b) = scene();
        let recorder = Recorder::new(&scene);
        let (mut coordinator, _handle) = SyncCoordinator::new(&scene, &recorder, AppConfig::default()).unwrap();

        let viewport = Viewport {
            center: kurbo::Point::new(500.0, 500.0),
            zoom: 2.0,
        };
        scene.set_viewport(viewport).unwrap();
        scene.set_selection(&[b]).unwrap();
        scene.fail_next_rasterize();

        let report = pollster::block_on(coordinator.run_batch(&[a, b]));
        assert_eq!(report.completed, 0);
        assert_eq!(report.skipped, 1);
        assert!(matches!(report.outcome, BatchOutcome::Failed { node, .. } if node == a));
        assert_eq!(scene.viewport(), viewport);
        assert_eq!(scene.selection(), vec![b]);
        assert!(recorder.notifications().last().unwrap().starts_with("Update stopped"));
    }

    #[test]
    fn test_batch_with_no_glass() {
        let scene = MemoryScene::default();
        let recorder = Recorder::new(&scene);
        let (mut coordinator, _handle) = SyncCoordinator::new(&scene, &recorder, AppConfig::default()).unwrap();

        let report = pollster::block_on(coordinator.batch(Vec::new()));
        assert_eq!(report.total, 0);
        assert_eq!(recorder.notifications(), vec!["No eligible shapes found".to_string()]);
    }

    #[test]
    fn test_handle_ignores_own_writes_and_interrupts_batches() {
        let (sender, mut events) = mpsc::unbounded();
        let flags = Arc::new(Flags::default());
        let handle = SyncHandle {
            sender,
            flags: flags.clone(),
        };
        let node = Uuid::new_v4();

        {
            let _outer = Writing::start(&flags);
            {
                let _inner = Writing::start(&flags);
                assert!(!handle.document_changed(vec![node]));
            }
            assert!(!handle.document_changed(vec![node]));
        }
        assert!(events.try_recv().is_err());

        flags.batch_running.store(true, Ordering::SeqCst);
        assert!(handle.document_changed(vec![node]));
        assert!(flags.interrupt.load(Ordering::SeqCst));
        assert_eq!(events.try_recv().unwrap(), Inbound::DocumentChanged { nodes: vec![node] });
    }

    #[test]
    fn test_only_mutations_open_write_windows() {
        let (scene, a, _) = scene();
        let flags = Arc::new(Flags::default());
        let host = ScopedHost {
            inner: &scene,
            flags: flags.clone(),
        };
        let seen = Rc::new(Cell::new(None));
        scene.set_rasterize_hook({
            let flags = flags.clone();
            let seen = seen.clone();
            move |_| seen.set(Some(flags.is_writing()))
        });

        host.set_opacity(a, 0.0).unwrap();
        assert!(!flags.is_writing());
        pollster::block_on(host.rasterize(Rect::new(0.0, 0.0, 10.0, 10.0))).unwrap();
        assert_eq!(seen.get(), Some(false));
    }

    #[test]
    fn test_edit_during_capture_rerenders() {
        let (scene, a, _) = scene();
        let scene = Rc::new(scene);
        let recorder = Recorder::new(&*scene);
        let (mut coordinator, handle) = SyncCoordinator::new(&*scene, &recorder, AppConfig::default()).unwrap();

        // The user drags the glass once while its first capture is in flight.
        scene.set_rasterize_hook({
            let scene = scene.clone();
            let handle = handle.clone();
            let mut moved = false;
            move |_| {
                if !moved {
                    moved = true;
                    scene.set_position(a, 300.0, 10.0).unwrap();
                    assert!(handle.document_changed(vec![a]));
                }
            }
        });

        handle.selection_changed(vec![a]);
        pollster::block_on(coordinator.run_pending());

        assert_eq!(captured(&recorder), vec![a, a]);
        assert_eq!(coordinator.state().tracked().map(|t| t.last_observed.x), Some(300.0));
    }

    #[test]
    fn test_batch_panic_restores_view() {
        let (scene, a, b) = scene();
        let recorder = Recorder::new(&scene);
        let (mut coordinator, handle) = SyncCoordinator::new(&scene, &recorder, AppConfig::default()).unwrap();

        let viewport = Viewport {
            center: kurbo::Point::new(-50.0, 75.0),
            zoom: 0.5,
        };
        scene.set_viewport(viewport).unwrap();
        scene.set_selection(&[b]).unwrap();
        scene.set_rasterize_hook(|_| panic!("host went away"));

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            pollster::block_on(coordinator.run_batch(&[a, b]))
        }));
        assert!(result.is_err());
        assert_eq!(scene.viewport(), viewport);
        assert_eq!(scene.selection(), vec![b]);
        assert!(!handle.is_batch_running());
    }

    #[test]
    fn test_degraded_capture_reports_bounding_box() {
        let scene = MemoryScene::default();
        let star = scene.add_node(
            scene.root(),
            NodeSpec::new("star", Primitive::Vector, 20.0, 20.0, 100.0, 100.0)
                .with_outline("M50 0 L100 100 L0 100 Z")
                .with_glass(EffectParameters::default()),
        );
        scene.set_fail_outline(true);
        let recorder = Recorder::new(&scene);
        let (mut coordinator, _handle) = SyncCoordinator::new(&scene, &recorder, AppConfig::default()).unwrap();

        pollster::block_on(coordinator.handle(Inbound::Render { node: star }));
        let captured = recorder
            .delivered()
            .into_iter()
            .find_map(|m| match m {
                Outbound::ImageCaptured(c) => Some(c),
                _ => None,
            })
            .unwrap();
        assert_eq!(captured.shape.kind, ShapeKind::Rectangle);
        assert_eq!(captured.shape_kind, ShapeKind::Rectangle);
        assert!(captured.distance_field_source.is_none());
    }

    #[test]
    fn test_coalesce() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let events = VecDeque::from(vec![
            Inbound::DocumentChanged { nodes: vec![a] },
            Inbound::DocumentChanged { nodes: vec![a, b] },
            Inbound::SelectionChanged { selection: vec![a] },
            Inbound::SelectionChanged { selection: vec![b] },
            Inbound::DocumentChanged { nodes: vec![a] },
        ]);
        let merged: Vec<Inbound> = coalesce(events).into_iter().collect();
        assert_eq!(
            merged,
            vec![
                Inbound::DocumentChanged { nodes: vec![a] },
                Inbound::DocumentChanged { nodes: vec![b] },
                Inbound::SelectionChanged { selection: vec![b] },
                Inbound::DocumentChanged { nodes: vec![a] },
            ]
        );
    }
}
