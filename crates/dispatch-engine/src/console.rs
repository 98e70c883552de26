//! Stdin hook for poking observers by hand.
//!
//! Typing `test` broadcasts a `BUTTON_PRESSED` event with payload `"cat"`,
//! the same thing a board's test button produces.

use std::sync::Arc;

use dispatch_bridge::Hub;
use dispatch_proto::Message;
use dispatch_types::DeliveryEvent;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Console line that triggers the test event.
pub const TEST_COMMAND: &str = "test";

/// Read stdin on a background task until it closes.
pub fn spawn(hub: Arc<Hub>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    handle_line(&hub, &line);
                }
                Ok(None) => {
                    debug!("Console closed");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "Console read failed");
                    break;
                }
            }
        }
    })
}

/// Act on one console line. Returns whether it was recognised.
pub fn handle_line(hub: &Hub, line: &str) -> bool {
    let line = line.trim();
    if line != TEST_COMMAND {
        if !line.is_empty() {
            debug!(line, "Console input ignored");
        }
        return false;
    }
    let event = DeliveryEvent::button_pressed(serde_json::Value::from("cat"));
    let receivers = hub.publish(&Message::Event(event));
    info!(receivers, "Test event broadcast");
    true
}
