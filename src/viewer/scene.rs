//! Live scene and the composer that fills it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;

use super::fetch::AssetFetcher;
use super::layout::{CenteredLayout, Framing, GridLayout, LayoutStrategy};
use super::loader::{LoaderEngine, ModelDecoder};
use super::ViewerError;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    pub fn point(p: [f32; 3]) -> Self {
        Self { min: p, max: p }
    }

    pub fn include(self, p: [f32; 3]) -> Self {
        let mut out = self;
        for axis in 0..3 {
            out.min[axis] = out.min[axis].min(p[axis]);
            out.max[axis] = out.max[axis].max(p[axis]);
        }
        out
    }

    pub fn union(self, other: Aabb) -> Self {
        self.include(other.min).include(other.max)
    }

    pub fn merge(a: Option<Aabb>, b: Option<Aabb>) -> Option<Aabb> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.union(b)),
            (a, None) => a,
            (None, b) => b,
        }
    }

    /// From accessor `min`/`max` arrays
    pub fn from_json(min: &Value, max: &Value) -> Option<Aabb> {
        let read = |v: &Value| -> Option<[f32; 3]> {
            let items = v.as_array()?;
            if items.len() < 3 {
                return None;
            }
            Some([
                items[0].as_f64()? as f32,
                items[1].as_f64()? as f32,
                items[2].as_f64()? as f32,
            ])
        };
        Some(Aabb {
            min: read(min)?,
            max: read(max)?,
        })
    }

    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) / 2.0,
            (self.min[1] + self.max[1]) / 2.0,
            (self.min[2] + self.max[2]) / 2.0,
        ]
    }

    /// Half the diagonal
    pub fn radius(&self) -> f32 {
        let d: f32 = (0..3).map(|i| (self.max[i] - self.min[i]).powi(2)).sum();
        d.sqrt() / 2.0
    }

    pub fn translated(&self, offset: [f32; 3]) -> Self {
        let mut out = *self;
        for axis in 0..3 {
            out.min[axis] += offset[axis];
            out.max[axis] += offset[axis];
        }
        out
    }
}

/// Decoded model summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedModel {
    pub meshes: usize,
    pub primitives: usize,
    pub vertices: usize,
    pub textures: usize,
    pub bounds: Option<Aabb>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub url: String,
    pub model: LoadedModel,
    pub offset: [f32; 3],
}

/// Counts GPU-side resources held by live scene objects
#[derive(Debug, Default)]
pub struct ResourceLedger {
    meshes: AtomicUsize,
    textures: AtomicUsize,
}

impl ResourceLedger {
    pub fn live_meshes(&self) -> usize {
        self.meshes.load(Ordering::SeqCst)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.load(Ordering::SeqCst)
    }

    fn acquire(&self, model: &LoadedModel) {
        self.meshes.fetch_add(model.meshes, Ordering::SeqCst);
        self.textures.fetch_add(model.textures, Ordering::SeqCst);
    }

    fn release(&self, model: &LoadedModel) {
        self.meshes.fetch_sub(model.meshes, Ordering::SeqCst);
        self.textures.fetch_sub(model.textures, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisposeReport {
    pub objects: usize,
    pub meshes: usize,
    pub textures: usize,
}

pub struct Scene {
    objects: Vec<SceneObject>,
    ledger: Arc<ResourceLedger>,
}

impl Scene {
    pub fn new(ledger: Arc<ResourceLedger>) -> Self {
        Self {
            objects: Vec::new(),
            ledger,
        }
    }

    pub fn insert(&mut self, object: SceneObject) {
        self.ledger.acquire(&object.model);
        self.objects.push(object);
    }

    /// Release every object
    pub fn dispose(&mut self) -> DisposeReport {
        let mut report = DisposeReport::default();
        for object in self.objects.drain(..) {
            self.ledger.release(&object.model);
            report.objects += 1;
            report.meshes += object.model.meshes;
            report.textures += object.model.textures;
        }
        report
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn urls(&self) -> Vec<String> {
        self.objects.iter().map(|o| o.url.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn bounds(&self) -> Option<Aabb> {
        self.objects.iter().fold(None, |acc, object| {
            let placed = object.model.bounds.map(|b| b.translated(object.offset));
            Aabb::merge(acc, placed)
        })
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAsset {
    pub url: String,
    pub reason: String,
}

/// Per-URL outcome of one load, in request order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub loaded: Vec<String>,
    pub failed: Vec<FailedAsset>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Some but not all URLs failed
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty() && !self.loaded.is_empty()
    }
}

/// Identifies what a composer is currently showing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneHandle {
    pub generation: u64,
    pub model_type: String,
}

/// Claim on the scene taken before a load's URLs are known
#[derive(Debug)]
pub struct LoadTicket {
    generation: u64,
    model_type: String,
    disposed: DisposeReport,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
pub struct SceneLoad {
    pub handle: SceneHandle,
    pub report: BatchReport,
    /// What the previous content held when it was released
    pub disposed: DisposeReport,
    pub framing: Option<Framing>,
}

struct Live {
    generation: u64,
    model_type: Option<String>,
    scene: Scene,
}

pub struct SceneComposer {
    engine: Arc<LoaderEngine>,
    fetcher: Arc<dyn AssetFetcher>,
    grid: Arc<dyn LayoutStrategy>,
    single: Arc<dyn LayoutStrategy>,
    ledger: Arc<ResourceLedger>,
    live: Mutex<Live>,
}

impl SceneComposer {
    pub fn new(engine: Arc<LoaderEngine>, fetcher: Arc<dyn AssetFetcher>) -> Self {
        let ledger = Arc::new(ResourceLedger::default());
        Self {
            engine,
            fetcher,
            grid: Arc::new(GridLayout::default()),
            single: Arc::new(CenteredLayout),
            live: Mutex::new(Live {
                generation: 0,
                model_type: None,
                scene: Scene::new(ledger.clone()),
            }),
            ledger,
        }
    }

    /// Layout used when more than one URL is loaded
    pub fn with_layout(mut self, layout: Arc<dyn LayoutStrategy>) -> Self {
        self.grid = layout;
        self
    }

    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    pub fn current(&self) -> Option<SceneHandle> {
        let live = self.live.lock();
        live.model_type.as_ref().map(|model_type| SceneHandle {
            generation: live.generation,
            model_type: model_type.clone(),
        })
    }

    /// URLs of the objects in the scene, in insertion order
    pub fn scene_urls(&self) -> Vec<String> {
        self.live.lock().scene.urls()
    }

    pub fn with_scene<R>(&self, f: impl FnOnce(&Scene) -> R) -> R {
        f(&self.live.lock().scene)
    }

    /// Release the scene if `handle` still names it. A stale handle's
    /// content was already released by the load that replaced it.
    pub fn release(&self, handle: &SceneHandle) -> DisposeReport {
        let mut live = self.live.lock();
        if live.generation != handle.generation {
            tracing::debug!(
                "Scene handle {} for '{}' already released",
                handle.generation,
                handle.model_type
            );
            return DisposeReport::default();
        }
        live.model_type = None;
        live.scene.dispose()
    }

    /// Replace the scene with the models at `urls`.
    ///
    /// The current content is released before the decoder is touched. Any
    /// load started earlier is superseded and its results are dropped on
    /// arrival. Individual URL failures are reported, not fatal.
    pub async fn load_into_scene(
        &self,
        model_type: &str,
        urls: &[String],
        previous: Option<&SceneHandle>,
    ) -> Result<SceneLoad, ViewerError> {
        let ticket = self.begin_load(model_type, previous);
        self.finish_load(ticket, urls).await
    }

    /// Claim the scene for `model_type` without knowing its URLs yet.
    ///
    /// Supersedes every earlier load and releases the current content right
    /// away. Callers that still have to look the URLs up take the ticket
    /// first, so a slow lookup for an older selection cannot win.
    pub fn begin_load(&self, model_type: &str, previous: Option<&SceneHandle>) -> LoadTicket {
        let mut live = self.live.lock();
        if let Some(previous) = previous {
            if previous.generation != live.generation {
                tracing::debug!(
                    "Previous handle {} is stale, scene is at {}",
                    previous.generation,
                    live.generation
                );
            }
        }
        live.generation += 1;
        live.model_type = Some(model_type.to_string());
        LoadTicket {
            generation: live.generation,
            model_type: model_type.to_string(),
            disposed: live.scene.dispose(),
        }
    }

    /// Whether `ticket` still owns the scene
    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.live.lock().generation == ticket.generation
    }

    /// Fetch, decode and place `urls` for a ticket from [`begin_load`].
    ///
    /// [`begin_load`]: SceneComposer::begin_load
    pub async fn finish_load(&self, ticket: LoadTicket, urls: &[String]) -> Result<SceneLoad, ViewerError> {
        let LoadTicket {
            generation,
            model_type,
            disposed,
        } = ticket;
        let model_type = model_type.as_str();
        self.ensure_current(generation, model_type)?;
        tracing::debug!(
            "Loading {} url(s) for '{}' (generation {}), released {} object(s)",
            urls.len(),
            model_type,
            generation,
            disposed.objects
        );

        let decoder = self
            .engine
            .get_loader()
            .await
            .map_err(ViewerError::LoaderExhausted)?;
        self.ensure_current(generation, model_type)?;

        let loads = urls
            .iter()
            .map(|url| self.load_one(url, decoder.clone(), generation));
        let outcomes = join_all(loads).await;

        let layout = if urls.len() == 1 {
            &self.single
        } else {
            &self.grid
        };

        let mut live = self.live.lock();
        if live.generation != generation {
            return Err(superseded(model_type));
        }

        let mut report = BatchReport::default();
        let accepted: Vec<(&String, LoadedModel)> = urls
            .iter()
            .zip(outcomes)
            .filter_map(|(url, outcome)| match outcome {
                Ok(model) => Some((url, model)),
                Err(reason) => {
                    tracing::warn!("Failed to load {}: {}", url, reason);
                    report.failed.push(FailedAsset {
                        url: url.clone(),
                        reason,
                    });
                    None
                }
            })
            .collect();

        let count = accepted.len();
        for (index, (url, model)) in accepted.into_iter().enumerate() {
            let offset = layout.place(index, count, model.bounds.as_ref());
            report.loaded.push(url.clone());
            live.scene.insert(SceneObject {
                url: url.clone(),
                model,
                offset,
            });
        }
        let framing = live.scene.bounds().map(|bounds| Framing::of(&bounds));

        tracing::info!(
            "Scene for '{}': {} loaded, {} failed",
            model_type,
            report.loaded.len(),
            report.failed.len()
        );

        Ok(SceneLoad {
            handle: SceneHandle {
                generation,
                model_type: model_type.to_string(),
            },
            report,
            disposed,
            framing,
        })
    }

    fn ensure_current(&self, generation: u64, model_type: &str) -> Result<(), ViewerError> {
        if self.live.lock().generation != generation {
            return Err(superseded(model_type));
        }
        Ok(())
    }

    /// Fetch and decode one URL. `Err` carries the failure reason.
    async fn load_one(
        &self,
        url: &str,
        decoder: Arc<dyn ModelDecoder>,
        generation: u64,
    ) -> Result<LoadedModel, String> {
        let bytes: Bytes = self.fetcher.fetch(url).await.map_err(|e| e.to_string())?;

        if self.live.lock().generation != generation {
            tracing::debug!("Discarding {} from superseded load {}", url, generation);
            return Err("superseded".to_string());
        }

        let decoded = tokio::task::spawn_blocking(move || decoder.decode(&bytes))
            .await
            .map_err(|e| format!("decoder panicked: {}", e))?;
        decoded.map_err(|e| {
            ViewerError::Decode {
                url: url.to_string(),
                reason: e.to_string(),
            }
            .to_string()
        })
    }
}

fn superseded(model_type: &str) -> ViewerError {
    ViewerError::Superseded {
        model_type: model_type.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewer::decode::{glb_container, minimal_glb};
    use crate::viewer::loader::{ContainerStrategy, LoaderStrategy, StrategyError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::oneshot;

    /// Serves canned responses; URLs with a gate wait until released
    #[derive(Default)]
    struct FakeFetcher {
        responses: HashMap<String, Result<Bytes, String>>,
        gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    }

    impl FakeFetcher {
        fn serve(mut self, url: &str, bytes: Vec<u8>) -> Self {
            self.responses.insert(url.to_string(), Ok(Bytes::from(bytes)));
            self
        }

        fn fail(mut self, url: &str, reason: &str) -> Self {
            self.responses.insert(url.to_string(), Err(reason.to_string()));
            self
        }

        fn gate(self, url: &str) -> (Self, oneshot::Sender<()>) {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().insert(url.to_string(), rx);
            (self, tx)
        }
    }

    #[async_trait]
    impl AssetFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<Bytes, ViewerError> {
            let gate = self.gates.lock().remove(url);
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            match self.responses.get(url) {
                Some(Ok(bytes)) => Ok(bytes.clone()),
                Some(Err(reason)) => Err(ViewerError::Fetch {
                    url: url.to_string(),
                    reason: reason.clone(),
                }),
                None => Err(ViewerError::Fetch {
                    url: url.to_string(),
                    reason: "HTTP 404 Not Found".to_string(),
                }),
            }
        }
    }

    struct Broken;

    #[async_trait]
    impl LoaderStrategy for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn obtain(&self) -> Result<Arc<dyn ModelDecoder>, StrategyError> {
            Err(StrategyError("unavailable".into()))
        }
    }

    fn container_engine() -> Arc<LoaderEngine> {
        Arc::new(LoaderEngine::new(vec![Arc::new(ContainerStrategy)]))
    }

    /// A model with `textures` texture entries
    fn textured_glb(textures: usize) -> Vec<u8> {
        let mut json: Value = serde_json::from_slice(container_json_of(&minimal_glb())).unwrap();
        json["textures"] = Value::Array(vec![serde_json::json!({}); textures]);
        glb_container(&json, &[])
    }

    fn container_json_of(glb: &[u8]) -> &[u8] {
        let len = u32::from_le_bytes([glb[12], glb[13], glb[14], glb[15]]) as usize;
        &glb[20..20 + len]
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_partial_batch_keeps_successes() {
        let fetcher = FakeFetcher::default()
            .serve("http://h/media/1.glb", minimal_glb())
            .fail("http://h/media/2.glb", "connection reset")
            .serve("http://h/media/3.glb", minimal_glb());
        let composer = SceneComposer::new(container_engine(), Arc::new(fetcher));

        let requested = urls(&["http://h/media/1.glb", "http://h/media/2.glb", "http://h/media/3.glb"]);
        let load = composer.load_into_scene("island_single_skin", &requested, None).await.unwrap();

        assert_eq!(load.report.loaded, urls(&["http://h/media/1.glb", "http://h/media/3.glb"]));
        assert_eq!(load.report.failed.len(), 1);
        assert_eq!(load.report.failed[0].url, "http://h/media/2.glb");
        assert!(load.report.failed[0].reason.contains("connection reset"));
        assert!(load.report.is_partial());

        assert_eq!(composer.scene_urls(), load.report.loaded);
        composer.with_scene(|scene| {
            assert_eq!(scene.len(), 2);
            assert_ne!(scene.objects()[0].offset, scene.objects()[1].offset);
        });
    }

    #[tokio::test]
    async fn test_malformed_binary_is_reported() {
        let fetcher = FakeFetcher::default()
            .serve("http://h/good.glb", minimal_glb())
            .serve("http://h/bad.glb", b"glTF\x02\x00\x00\x00garbage".to_vec());
        let composer = SceneComposer::new(container_engine(), Arc::new(fetcher));

        let load = composer
            .load_into_scene("uv_compensating", &urls(&["http://h/good.glb", "http://h/bad.glb"]), None)
            .await
            .unwrap();
        assert_eq!(load.report.loaded, urls(&["http://h/good.glb"]));
        assert!(load.report.failed[0].reason.contains("decode"));
    }

    #[tokio::test]
    async fn test_single_url_is_centered_and_framed() {
        let fetcher = FakeFetcher::default().serve("http://h/one.glb", minimal_glb());
        let composer = SceneComposer::new(container_engine(), Arc::new(fetcher));

        let load = composer
            .load_into_scene("wall_mounted_skin", &urls(&["http://h/one.glb"]), None)
            .await
            .unwrap();
        assert!(load.report.is_complete());

        let framing = load.framing.unwrap();
        assert_eq!(framing.center, [0.0, 0.0, 0.0]);
        composer.with_scene(|scene| assert_eq!(scene.objects()[0].offset, [-0.5, -0.5, 0.0]));
    }

    #[tokio::test]
    async fn test_switching_releases_previous_resources() {
        let fetcher = FakeFetcher::default()
            .serve("http://h/a.glb", textured_glb(2))
            .serve("http://h/b.glb", textured_glb(1));
        let composer = SceneComposer::new(container_engine(), Arc::new(fetcher));

        let first = composer.load_into_scene("a", &urls(&["http://h/a.glb"]), None).await.unwrap();
        assert_eq!(composer.ledger().live_textures(), 2);

        for _ in 0..3 {
            let handle = composer.current();
            let load = composer
                .load_into_scene("b", &urls(&["http://h/b.glb"]), handle.as_ref())
                .await
                .unwrap();
            assert_eq!(load.disposed.objects, 1);
            assert_eq!(composer.ledger().live_meshes(), 1);
            assert_eq!(composer.ledger().live_textures(), 1);
        }

        // Stale handle releases nothing; the current one releases the scene
        assert_eq!(composer.release(&first.handle), DisposeReport::default());
        let current = composer.current().unwrap();
        assert_eq!(composer.release(&current).objects, 1);
        assert_eq!(composer.ledger().live_meshes(), 0);
        assert!(composer.current().is_none());
    }

    #[tokio::test]
    async fn test_superseded_results_never_reach_scene() {
        let (fetcher, release_a) = FakeFetcher::default()
            .serve("http://h/a.glb", minimal_glb())
            .serve("http://h/b.glb", minimal_glb())
            .gate("http://h/a.glb");
        let composer = Arc::new(SceneComposer::new(container_engine(), Arc::new(fetcher)));

        let slow = {
            let composer = composer.clone();
            tokio::spawn(async move {
                composer
                    .load_into_scene("type_a", &urls(&["http://h/a.glb"]), None)
                    .await
            })
        };

        // Wait until type A's load owns the scene, then switch to B
        while composer.current().map(|h| h.model_type) != Some("type_a".to_string()) {
            tokio::task::yield_now().await;
        }
        let b = composer
            .load_into_scene("type_b", &urls(&["http://h/b.glb"]), None)
            .await
            .unwrap();
        assert_eq!(b.report.loaded, urls(&["http://h/b.glb"]));

        release_a.send(()).unwrap();
        let a = slow.await.unwrap();
        assert!(matches!(a, Err(ViewerError::Superseded { ref model_type }) if model_type == "type_a"));

        assert_eq!(composer.scene_urls(), urls(&["http://h/b.glb"]));
        assert_eq!(composer.current().unwrap().model_type, "type_b");
    }

    #[tokio::test]
    async fn test_exhausted_loader_is_terminal_error() {
        let fetcher = FakeFetcher::default().serve("http://h/a.glb", minimal_glb());
        let engine = Arc::new(LoaderEngine::new(vec![Arc::new(Broken)]));
        let composer = SceneComposer::new(engine, Arc::new(fetcher));

        let err = composer
            .load_into_scene("a", &urls(&["http://h/a.glb"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ViewerError::LoaderExhausted(_)));
        assert!(composer.scene_urls().is_empty());
    }

    #[test]
    fn test_scene_drop_releases_ledger() {
        let ledger = Arc::new(ResourceLedger::default());
        {
            let mut scene = Scene::new(ledger.clone());
            scene.insert(SceneObject {
                url: "u".into(),
                model: LoadedModel {
                    meshes: 3,
                    textures: 2,
                    ..Default::default()
                },
                offset: [0.0; 3],
            });
            assert_eq!(ledger.live_meshes(), 3);
        }
        assert_eq!(ledger.live_meshes(), 0);
        assert_eq!(ledger.live_textures(), 0);
    }
}
