/// Example client: connects to an echo server, exchanges a few messages and closes.
///
/// ```text
/// cargo run --example client --features logging -- wss://echo.websocket.org
/// ```
use std::time::Duration;

use tokio::{sync::mpsc, time::interval};
use wsengine::{CloseCode, Event, Options, WebSocket};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Debug)?;

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://echo.websocket.org".to_string());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let ws = WebSocket::connect(url.parse()?)
        .with_options(
            Options::default()
                .with_send_timeout(Duration::from_secs(10))
                .with_close_timeout(Duration::from_secs(3)),
        )
        .open(tx)?;

    let mut ival = interval(Duration::from_secs(2));
    let mut sent = 0;

    loop {
        tokio::select! {
            _ = ival.tick() => {
                if ws.ready_state() != wsengine::ReadyState::Open {
                    continue;
                }
                if sent == 3 {
                    ws.close_with(CloseCode::Normal, "done")?;
                    continue;
                }

                sent += 1;
                ws.send_text(format!("message #{sent}"))?;
                ws.send_ping(format!("ping #{sent}"))?;
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    break;
                };

                match event {
                    Event::Open => log::info!("connected, protocol={:?}", ws.protocol()),
                    Event::Text(text) => log::info!("text: {text}"),
                    Event::Binary(data) => log::info!("binary: {} bytes", data.len()),
                    Event::Pong(payload) => {
                        log::debug!("pong: {}", String::from_utf8_lossy(&payload))
                    }
                    Event::PongSent(_) => {}
                    Event::Error(err) => log::warn!("error: {err}"),
                    Event::Close(err) => {
                        log::info!("closed: {err:?}");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
