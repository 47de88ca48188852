//! Manager wiring over in-memory collaborators, for unit tests.

use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

use crate::agent::manager::AppletManager;
use crate::cli::config::Config;
use crate::control_plane::mock::{FixedReleaseFeed, MockControlPlane};
use crate::runtime::mock::MockRuntime;

pub const PROXY_RELEASE: &str = "1.2.0";

pub struct Harness {
    pub manager: Arc<AppletManager>,
    pub runtime: Arc<MockRuntime>,
    pub control_plane: Arc<MockControlPlane>,
    pub dir: TempDir,
}

/// Authenticated manager over an empty engine.
pub fn harness(configure: impl FnOnce(&mut Config)) -> Harness {
    harness_with(MockRuntime::new(), configure)
}

pub fn harness_with(runtime: MockRuntime, configure: impl FnOnce(&mut Config)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.app_path = dir.path().to_path_buf();
    config.engine.docker_root = "docker".into();
    configure(&mut config);

    let runtime = Arc::new(runtime);
    let control_plane = Arc::new(MockControlPlane::new());
    let manager = AppletManager::new(
        config,
        runtime.clone(),
        control_plane.clone(),
        Arc::new(FixedReleaseFeed(PROXY_RELEASE.to_string())),
    )
    .unwrap();
    manager.set_token(Some("device-token".to_string())).unwrap();

    Harness {
        manager,
        runtime,
        control_plane,
        dir,
    }
}

/// Collects formatted log lines written while the guard from
/// [`LogCapture::install`] is alive on the current thread.
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
