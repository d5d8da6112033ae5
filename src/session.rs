//! The shared rendering-engine session.
//!
//! One [`BrowserSession`] owns the single engine connection of the process.
//! It is launched lazily on the first page request, checked for liveness on
//! every acquisition and relaunched after it dies.
//!
//! ```text
//! Uninitialized ──acquire──▶ Launching ──ok──▶ Ready ──check fails──▶ Disconnected
//!       ▲                        │                                        │
//!       └────────launch error────┘◀──────────────acquire──────────────────┘
//! ```
//!
//! The check-then-launch sequence runs under `launch_guard`, so at most one
//! launch is in flight; callers that queue behind it re-check the state and
//! pick up the browser it produced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::engine::{EngineBrowser, EngineLauncher};
use crate::error::{ForgeError, Result};
use crate::page::RenderPage;

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Launching,
    Ready,
    Disconnected,
    Closed,
}

enum State {
    Uninitialized,
    Launching,
    Ready(Arc<dyn EngineBrowser>),
    /// Holds the dead connection so the next launch can release it.
    Disconnected(Arc<dyn EngineBrowser>),
    Closed,
}

impl State {
    fn status(&self) -> SessionStatus {
        match self {
            State::Uninitialized => SessionStatus::Uninitialized,
            State::Launching => SessionStatus::Launching,
            State::Ready(_) => SessionStatus::Ready,
            State::Disconnected(_) => SessionStatus::Disconnected,
            State::Closed => SessionStatus::Closed,
        }
    }
}

pub struct BrowserSession {
    launcher: Arc<dyn EngineLauncher>,
    state: Mutex<State>,
    launch_guard: tokio::sync::Mutex<()>,
    launches: AtomicU64,
}

impl BrowserSession {
    pub fn new(launcher: Arc<dyn EngineLauncher>) -> Self {
        Self {
            launcher,
            state: Mutex::new(State::Uninitialized),
            launch_guard: tokio::sync::Mutex::new(()),
            launches: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.lock_state().status()
    }

    /// Number of launch attempts made so far, successful or not.
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }

    /// Obtain a fresh page from the live browser, launching it if needed.
    ///
    /// Page acquisition itself is not serialised; only launches are.
    pub async fn acquire_page(&self) -> Result<RenderPage> {
        let browser = self.browser().await?;
        match browser.new_page().await {
            Ok(page) => Ok(RenderPage::new(page)),
            Err(e) => {
                if !browser.is_alive().await {
                    self.mark_disconnected(&browser);
                }
                Err(e.into())
            }
        }
    }

    /// The live browser, launching or relaunching it when necessary.
    pub async fn browser(&self) -> Result<Arc<dyn EngineBrowser>> {
        if let Some(browser) = self.ready_browser().await? {
            return Ok(browser);
        }

        let _launch = self.launch_guard.lock().await;
        // Whoever held the guard before us may already have launched.
        if let Some(browser) = self.ready_browser().await? {
            return Ok(browser);
        }
        self.launch().await
    }

    /// Record that `browser` is dead. A no-op if the session has already
    /// moved on to another connection.
    pub fn mark_disconnected(&self, browser: &Arc<dyn EngineBrowser>) {
        let mut state = self.lock_state();
        let is_current = matches!(&*state, State::Ready(current) if same_browser(current, browser));
        if is_current {
            log::info!("Rendering engine disconnected; it will be relaunched on next use");
            *state = State::Disconnected(Arc::clone(browser));
        }
    }

    /// Close the engine and refuse further work. Waits for an in-flight launch
    /// to settle so no engine process outlives the session.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), State::Closed);
        let _launch = self.launch_guard.lock().await;

        match previous {
            State::Ready(browser) | State::Disconnected(browser) => {
                log::info!("Closing rendering engine");
                browser.close().await;
            }
            State::Closed => return,
            _ => {}
        }
        log::info!("Rendering engine session closed");
    }

    async fn ready_browser(&self) -> Result<Option<Arc<dyn EngineBrowser>>> {
        let browser = {
            let state = self.lock_state();
            match &*state {
                State::Ready(browser) => Arc::clone(browser),
                State::Closed => return Err(ForgeError::ShuttingDown),
                _ => return Ok(None),
            }
        };

        if browser.is_alive().await {
            Ok(Some(browser))
        } else {
            self.mark_disconnected(&browser);
            Ok(None)
        }
    }

    /// Must be called with `launch_guard` held.
    async fn launch(&self) -> Result<Arc<dyn EngineBrowser>> {
        let previous = {
            let mut state = self.lock_state();
            if matches!(&*state, State::Closed) {
                return Err(ForgeError::ShuttingDown);
            }
            std::mem::replace(&mut *state, State::Launching)
        };
        let reset = LaunchReset::new(self);

        if let State::Disconnected(dead) = previous {
            dead.close().await;
        }

        let attempt = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("Launching rendering engine (attempt {attempt})");

        let browser = match self.launcher.launch().await {
            Ok(browser) => browser,
            Err(e) => {
                log::error!("Rendering engine failed to launch: {e}");
                // `reset` puts the state back to Uninitialized.
                return Err(ForgeError::EngineUnavailable(e.to_string()));
            }
        };
        reset.disarm();

        let shut_down = {
            let mut state = self.lock_state();
            if matches!(&*state, State::Closed) {
                true
            } else {
                *state = State::Ready(Arc::clone(&browser));
                false
            }
        };
        if shut_down {
            browser.close().await;
            return Err(ForgeError::ShuttingDown);
        }

        log::info!("Rendering engine ready");
        Ok(browser)
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Puts a `Launching` session back to `Uninitialized` unless disarmed, so a
/// failed or cancelled launch never leaves the session stuck.
struct LaunchReset<'a> {
    session: &'a BrowserSession,
    armed: bool,
}

impl<'a> LaunchReset<'a> {
    fn new(session: &'a BrowserSession) -> Self {
        Self {
            session,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LaunchReset<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.session.lock_state();
        if matches!(&*state, State::Launching) {
            *state = State::Uninitialized;
        }
    }
}

fn same_browser(a: &Arc<dyn EngineBrowser>, b: &Arc<dyn EngineBrowser>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
