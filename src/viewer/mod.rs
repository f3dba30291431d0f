//! Client-side model viewing.
//!
//! A [`LoaderEngine`] negotiates a working glTF decoder once per engine
//! through an ordered list of strategies. A [`SceneComposer`] fetches resolved
//! asset URLs, decodes them with that decoder and places the results into a
//! single live [`Scene`], releasing the previous content first and discarding
//! results that arrive after the selection changed.

pub mod client;
pub mod decode;
pub mod fetch;
pub mod layout;
pub mod loader;
pub mod scene;

use thiserror::Error;

pub use client::{CatalogClient, ViewMode, Viewer};
pub use decode::{ContainerDecoder, DecodeError, FullGltfDecoder, LenientGltfDecoder};
pub use fetch::{AssetFetcher, HttpFetcher};
pub use layout::{CenteredLayout, Framing, GridLayout, LayoutStrategy};
pub use loader::{
    default_strategies, ContainerStrategy, FullGltfStrategy, LenientGltfStrategy, LoaderEngine,
    LoaderError, LoaderState, LoaderStrategy, ModelDecoder, StrategyError,
};
pub use scene::{
    Aabb, BatchReport, DisposeReport, FailedAsset, LoadTicket, LoadedModel, ResourceLedger, Scene,
    SceneComposer, SceneHandle, SceneLoad, SceneObject,
};

#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("No 3D loader available: {0}")]
    LoaderExhausted(LoaderError),

    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to decode {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Load for '{model_type}' was superseded")]
    Superseded { model_type: String },

    #[error("Catalog request failed: {0}")]
    Catalog(String),

    #[error("{0}")]
    NoModel(String),
}
