use std::time::Duration;

use speech_session::audio::BufferedAudioSource;
use speech_session::types::{
    Activity, BotEvent, BotEventKind, CancellationReason, ClientFrame, ConnectorState,
    ResultReason, ServerFrame,
};
use speech_session::{
    BotConnectorConfig, BotConnectorSession, CommunicationType, EventLog, MemoryTransport,
    SessionError,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn config() -> BotConnectorConfig {
    BotConnectorConfig::from_secret_key("secret", "key", "westus")
        .with_communication_type(CommunicationType::AutoReply)
}

async fn recv(peer: &mut speech_session::connector::MemoryPeer) -> Option<ClientFrame> {
    tokio::time::timeout(TIMEOUT, peer.recv())
        .await
        .expect("timed out waiting for a frame")
}

#[tokio::test]
async fn send_after_disconnect_is_rejected() {
    let (transport, mut server) = MemoryTransport::new();
    let session = BotConnectorSession::builder(config())
        .transport(transport)
        .build()
        .unwrap();

    session.connect().await.unwrap();
    let mut peer = server.accept().await.unwrap();

    let a = Activity::from_serialized(r#"{"type":"message","text":"A"}"#).unwrap();
    session.send_activity(a).await.unwrap();
    session.disconnect().await.unwrap();

    let b = Activity::from_serialized(r#"{"type":"message","text":"B"}"#).unwrap();
    assert_eq!(session.send_activity(b).await, Err(SessionError::NotConnected));

    match recv(&mut peer).await {
        Some(ClientFrame::ActivitySend { activity }) => assert_eq!(activity["text"], "A"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(recv(&mut peer).await, None);
    assert_eq!(session.state(), ConnectorState::Disconnected);
    assert!(session.session_info().unwrap().is_ended());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn activities_and_recognition_are_independent() {
    let (transport, mut server) = MemoryTransport::new();
    let session = BotConnectorSession::builder(config())
        .audio(BufferedAudioSource::silence(3, 20))
        .transport(transport)
        .build()
        .unwrap();
    let log = EventLog::attach(session.events());

    session.connect().await.unwrap();
    let mut peer = server.accept().await.unwrap();
    let listen = session.listen_once();

    let turn_id = match recv(&mut peer).await {
        Some(ClientFrame::ListenStart { turn_id, .. }) => turn_id,
        other => panic!("unexpected {:?}", other),
    };
    peer.send(ServerFrame::Activity {
        activity: serde_json::json!({"type": "typing"}),
        audio: None,
    })
    .unwrap();
    peer.send(ServerFrame::SpeechHypothesis {
        turn_id: turn_id.clone(),
        text: "turn".to_string(),
    })
    .unwrap();
    peer.send(ServerFrame::SpeechCanceled {
        turn_id,
        code: Some("NoAudio".to_string()),
        message: "audio ended too early".to_string(),
    })
    .unwrap();

    let result = listen.await.unwrap();
    assert_eq!(result.reason(), ResultReason::Canceled);
    assert!(log.wait_for_len(4, TIMEOUT).await);

    let recognition: Vec<_> = log
        .kinds()
        .into_iter()
        .filter(|kind| *kind != BotEventKind::ActivityReceived)
        .collect();
    assert_eq!(
        recognition,
        vec![
            BotEventKind::SessionStarted,
            BotEventKind::Canceled,
            BotEventKind::SessionStopped
        ]
    );
    let canceled = log.snapshot().into_iter().find_map(|event| match event {
        BotEvent::Canceled { details, .. } => Some(details),
        _ => None,
    });
    let canceled = canceled.unwrap();
    assert_eq!(canceled.reason(), CancellationReason::Backend);
    assert_eq!(canceled.code(), Some("NoAudio"));

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn backend_error_faults_pending_listen() {
    let (transport, mut server) = MemoryTransport::new();
    let (_frames, audio) = speech_session::audio::ChannelAudioSource::new(1);
    let session = BotConnectorSession::builder(config())
        .audio(audio)
        .transport(transport)
        .build()
        .unwrap();
    let log = EventLog::attach(session.events());

    session.connect().await.unwrap();
    let mut peer = server.accept().await.unwrap();
    let listen = session.listen_once();
    assert!(matches!(recv(&mut peer).await, Some(ClientFrame::ListenStart { .. })));

    peer.send(ServerFrame::Error {
        code: Some("Unauthorized".to_string()),
        message: "bad channel secret".to_string(),
    })
    .unwrap();

    let err = listen.await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(ref m) if m.contains("bad channel secret")));
    assert!(
        log.wait_until(TIMEOUT, |events| events
            .iter()
            .any(|e| e.kind() == BotEventKind::Canceled))
            .await
    );

    session.disconnect().await.unwrap();
    assert_eq!(session.state(), ConnectorState::Disconnected);
    session.connect().await.unwrap();
    assert!(server.accept().await.is_some());
}
