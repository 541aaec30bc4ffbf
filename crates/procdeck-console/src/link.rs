use crate::state::LinkEvent;
use futures_util::{SinkExt, StreamExt};
use procdeck_core::{encode_command, Command};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(20);

/// Owns the supervisor connection for the life of the program: connect,
/// pump frames and commands, reconnect with capped backoff. Events flow to
/// the mirror through `tx`; commands drain from `command_rx` in queue order.
pub async fn link_loop(
    url: String,
    tx: mpsc::Sender<LinkEvent>,
    mut command_rx: mpsc::Receiver<Command>,
) {
    let mut backoff = INITIAL_BACKOFF;
    let mut command_open = true;

    loop {
        let stream = match connect_async(url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(err) => {
                warn!(url = %url, error = %err, "supervisor connect failed");
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = INITIAL_BACKOFF;
        info!(url = %url, "supervisor connected");

        if tx.send(LinkEvent::Connected).await.is_err() {
            return;
        }
        let (mut writer, mut reader) = stream.split();

        loop {
            tokio::select! {
                frame = reader.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if tx.send(LinkEvent::Frame(text)).await.is_err() {
                                return;
                            }
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                        Some(Ok(Message::Binary(_) | Message::Frame(_))) => {}
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(err)) => {
                            warn!(error = %err, "supervisor read failed");
                            let _ = tx.send(LinkEvent::ChannelError(err.to_string())).await;
                            break;
                        }
                    }
                }
                maybe_command = command_rx.recv(), if command_open => {
                    match maybe_command {
                        Some(command) => {
                            let frame = encode_command(&command);
                            if writer.send(Message::Text(frame)).await.is_err() {
                                break;
                            }
                        }
                        None => command_open = false,
                    }
                }
            }
        }

        if tx.send(LinkEvent::Disconnected).await.is_err() {
            return;
        }
        // Commands accepted before the drop are stale now; the resync pair
        // must be the first thing the next connection sends.
        while command_rx.try_recv().is_ok() {}
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut backoff = INITIAL_BACKOFF;
        backoff = next_backoff(backoff);
        assert_eq!(backoff, Duration::from_secs(2));
        backoff = next_backoff(backoff);
        assert_eq!(backoff, Duration::from_secs(4));
        for _ in 0..10 {
            backoff = next_backoff(backoff);
        }
        assert_eq!(backoff, MAX_BACKOFF);
    }
}
