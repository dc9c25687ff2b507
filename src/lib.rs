pub mod adapter;
pub mod app;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod imageops_ai;
pub mod model;
pub mod save;
pub mod traits;
pub mod video;

pub mod mocks;

pub use adapter::{Adapter, Source};
pub use app::{App, Studio};
pub use cli::{Cli, Command};
pub use dispatch::Dispatcher;
pub use errors::{CollagerError, Result};
pub use model::{OnnxMaskModel, OnnxUpscaler};
pub use save::{OutputFormat, Save, VideoSink};
pub use traits::*;
pub use video::{VideoInfo, VideoReader, VideoWriter};
