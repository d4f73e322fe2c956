//! Console command loop.
//!
//! Three single-character commands, nothing else: `q` shuts the system
//! down, `c` clears active tactical signals, `r` forces a market-regime
//! recomputation.

use std::sync::Arc;

use crossterm::event::{Event as TermEvent, EventStream, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::engine::Engine;

pub async fn run_console(engine: Arc<Engine>) {
    if terminal::enable_raw_mode().is_err() {
        warn!("no interactive terminal, console commands disabled");
        return;
    }

    let mut events = EventStream::new();
    let mut shutdown = engine.shutdown_rx();

    info!("console ready: [q]uit  [c]lear signals  [r]efresh regime");

    loop {
        tokio::select! {
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(TermEvent::Key(key))) => {
                        if handle_key(&engine, key).await {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("console input error: {e}");
                        break;
                    }
                    None => break,
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    let _ = terminal::disable_raw_mode();
}

/// Returns true when the loop should stop
async fn handle_key(engine: &Engine, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') => {
            engine.shutdown().await;
            true
        }
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            engine.shutdown().await;
            true
        }
        KeyCode::Char('c') => {
            engine.clear_active_signals().await;
            false
        }
        KeyCode::Char('r') => {
            engine.force_regime_recompute().await;
            false
        }
        other => {
            debug!(?other, "unmapped console key ignored");
            false
        }
    }
}
