mod logging;
pub use logging::setup_logging;
mod allowlist;
pub use allowlist::{
    normalize_domain, parse_allowlist, AllowList, AllowListStore, FileAllowListStore, InMemoryAllowListStore,
    ReloadStatus,
};
mod engine;
pub use engine::{FilterEngine, ForwardJob, FrameAction};
mod interface;
pub use interface::{read_frames, FrameSink, ReadLoopExit, ShutdownHandle};
mod server;
pub use server::{FilterServer, DEFAULT_MAX_FRAME_SIZE};
mod stats;
pub use stats::{Stats, StatsSnapshot};
mod upstream;
pub use upstream::{ForwardError, UpstreamForwarder, DEFAULT_UPSTREAM_TIMEOUT};
mod cli;
pub use cli::Args;
mod app;
pub use app::App;
