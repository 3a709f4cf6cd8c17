use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tracing::{error, info, trace};

use killagram_types::api::RealtimeQuery;
use killagram_types::events::EventEnvelope;
use killagram_types::models::ConversationId;

use crate::Gateway;
use crate::sync_loop::{CloseReason, SyncSession};

/// Drive one realtime channel until it closes.
///
/// The socket is already upgraded; the token is checked here so a rejected
/// client gets a proper close code instead of a failed handshake.
pub async fn serve(socket: WebSocket, gateway: Gateway, query: RealtimeQuery) {
    let (sender, receiver) = socket.split();
    drive(sender, receiver, gateway, query).await;
}

/// The channel loop over any outgoing frame sink and incoming frame stream.
///
/// Whatever ends the loop, the provider connection is released, the registry
/// entry is dropped and, where the client can still hear it, a close frame
/// carrying the reason is sent.
pub async fn drive<S, R>(
    mut sender: S,
    mut receiver: R,
    gateway: Gateway,
    query: RealtimeQuery,
) -> CloseReason
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let user = query.phone;
    let mut session = SyncSession::new(&gateway, &user, query.chat_id.map(ConversationId));
    if let Err(reason) = session.authenticate(&gateway, &query.token).await {
        send_close(&mut sender, &reason).await;
        return reason;
    }

    let mut ticker = tokio::time::interval(gateway.tick_interval());
    let (conn_id, handle) = gateway.registry().register(&user).await;

    let reason = 'session: loop {
        tokio::select! {
            _ = ticker.tick() => {
                let tick = session.tick(Utc::now()).await;
                if !send_events(&mut sender, &user, &tick.events).await {
                    break 'session CloseReason::SendFailed;
                }
                if let Some(reason) = tick.close {
                    break reason;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break CloseReason::ClientClosed,
                    Some(Ok(_)) => trace!("Ignoring client frame from {}", user),
                }
            }
            reason = handle.closed() => break reason,
        }
    };

    // A revoked channel still delivers the status change that revoked it
    if reason == CloseReason::Revoked {
        let pending = gateway.state().outbox.drain(&user);
        send_events(&mut sender, &user, &pending).await;
    }

    session.close().await;
    gateway.registry().unregister(&user, conn_id).await;
    send_close(&mut sender, &reason).await;
    info!("Realtime channel for {} ended: {}", user, reason.as_str());
    reason
}

/// False once the sink refuses a frame.
async fn send_events<S>(sender: &mut S, user: &str, events: &[EventEnvelope]) -> bool
where
    S: Sink<Message> + Unpin,
{
    for envelope in events {
        let text = match serde_json::to_string(envelope) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {} for {}: {}", envelope.event_id, user, e);
                continue;
            }
        };
        if sender.send(Message::Text(text.into())).await.is_err() {
            return false;
        }
    }
    true
}

async fn send_close<S>(sender: &mut S, reason: &CloseReason)
where
    S: Sink<Message> + Unpin,
{
    if !reason.notifies_client() {
        return;
    }
    let frame = CloseFrame {
        code: reason.code(),
        reason: reason.as_str().into(),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::sink;
    use futures_util::stream;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    use killagram_provider::memory::LOGIN_CODE;
    use killagram_provider::{
        CredentialStore, MemoryCredentialStore, MemoryProvider, MessagingProvider,
    };
    use killagram_state::{State, StateConfig};
    use killagram_types::events::RealtimeEvent;

    const USER: &str = "+15550002";

    type FrameSink = Pin<Box<dyn Sink<Message, Error = mpsc::error::SendError<Message>> + Send>>;

    /// A running channel: frames the client would receive, and the client's
    /// side of the incoming stream. Dropping `client` hangs up.
    struct Channel {
        frames: mpsc::UnboundedReceiver<Message>,
        client: mpsc::UnboundedSender<Result<Message, axum::Error>>,
        task: JoinHandle<CloseReason>,
    }

    impl Channel {
        /// Everything the client received, in order.
        fn received(&mut self) -> Vec<Message> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.frames.try_recv() {
                frames.push(frame);
            }
            frames
        }
    }

    async fn fixture() -> (Gateway, MemoryProvider) {
        let state = Arc::new(State::new(StateConfig {
            session_secret: b"connection-test-secret".to_vec(),
            rate_limit_per_minute: 60,
        }));
        let provider = MemoryProvider::new();
        let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
        let credential = provider.sign_in(USER, LOGIN_CODE, None).await.unwrap();
        credentials.save(USER, &credential).unwrap();

        let gateway = Gateway::new(
            state,
            Arc::new(provider.clone()),
            credentials,
            Duration::from_millis(10),
        );
        (gateway, provider)
    }

    fn start(gateway: &Gateway, token: &str) -> Channel {
        let (frame_tx, frames) = mpsc::unbounded_channel();
        let sender: FrameSink = Box::pin(sink::unfold(frame_tx, |tx, frame: Message| async move {
            tx.send(frame).map(|_| tx)
        }));

        let (client, mut incoming) = mpsc::unbounded_channel();
        let receiver = stream::poll_fn(move |cx| incoming.poll_recv(cx));

        let query = RealtimeQuery {
            phone: USER.to_string(),
            token: token.to_string(),
            chat_id: None,
        };
        let task = tokio::spawn(drive(sender, receiver, gateway.clone(), query));
        Channel {
            frames,
            client,
            task,
        }
    }

    async fn wait_until_connected(gateway: &Gateway) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !gateway.registry().is_connected(USER).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    fn close_code(frame: &Message) -> Option<u16> {
        match frame {
            Message::Close(Some(frame)) => Some(frame.code),
            _ => None,
        }
    }

    fn event_types(frames: &[Message]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|frame| match frame {
                Message::Text(text) => {
                    let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                    Some(value["event_type"].as_str().unwrap().to_string())
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn revoked_channel_flushes_status_then_closes() {
        let (gateway, provider) = fixture().await;
        let token = gateway.state().tokens.issue_realtime(USER).unwrap();
        let mut channel = start(&gateway, &token);
        wait_until_connected(&gateway).await;
        assert_eq!(provider.open_connections(), 1);

        let state = gateway.state();
        let account = state.accounts.freeze(USER, "spam");
        state.tokens.bump_version(USER).await.unwrap();
        state.outbox.push(
            USER,
            RealtimeEvent::AccountStatusUpdated {
                status: account.status,
                freeze_reason: account.freeze_reason.clone(),
            },
        );
        assert!(gateway.registry().close_user(USER, CloseReason::Revoked).await);

        let reason = (&mut channel.task).await.unwrap();
        assert_eq!(reason, CloseReason::Revoked);

        let frames = channel.received();
        assert_eq!(event_types(&frames), ["account_status_updated"]);
        assert_eq!(frames.last().and_then(close_code), Some(4403));
        assert_eq!(provider.open_connections(), 0);
        assert!(!gateway.registry().is_connected(USER).await);
        assert!(state.outbox.drain(USER).is_empty());
    }

    #[tokio::test]
    async fn newer_channel_supersedes_older() {
        let (gateway, provider) = fixture().await;
        let token = gateway.state().tokens.issue_realtime(USER).unwrap();

        let mut first = start(&gateway, &token);
        wait_until_connected(&gateway).await;
        let second = start(&gateway, &token);

        let reason = tokio::time::timeout(Duration::from_secs(2), &mut first.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::Superseded);
        assert_eq!(first.received().last().and_then(close_code), Some(4409));

        // The older channel leaving does not unregister the newer one
        wait_until_connected(&gateway).await;
        assert_eq!(provider.open_connections(), 1);

        drop(second.client);
        assert_eq!(second.task.await.unwrap(), CloseReason::ClientClosed);
        assert_eq!(provider.open_connections(), 0);
        assert!(!gateway.registry().is_connected(USER).await);
    }

    #[tokio::test]
    async fn client_close_releases_everything_without_a_close_frame() {
        let (gateway, provider) = fixture().await;
        let token = gateway.state().tokens.issue_realtime(USER).unwrap();
        let mut channel = start(&gateway, &token);
        wait_until_connected(&gateway).await;

        channel.client.send(Ok(Message::Close(None))).unwrap();
        assert_eq!((&mut channel.task).await.unwrap(), CloseReason::ClientClosed);

        assert!(channel.received().iter().all(|frame| close_code(frame).is_none()));
        assert_eq!(provider.open_connections(), 0);
        assert!(!gateway.registry().is_connected(USER).await);
    }

    #[tokio::test]
    async fn bad_token_closes_before_registering() {
        let (gateway, provider) = fixture().await;
        let mut channel = start(&gateway, "not-a-token");

        assert_eq!((&mut channel.task).await.unwrap(), CloseReason::Unauthorized);
        let frames = channel.received();
        assert_eq!(frames.len(), 1);
        assert_eq!(close_code(&frames[0]), Some(4401));
        assert_eq!(provider.open_connections(), 0);
        assert!(!gateway.registry().is_connected(USER).await);
    }
}
