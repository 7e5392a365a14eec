//! Transport registry lifecycle: creation idempotence, cross-node
//! recreation, authorization-hash validation, and destruction.

use crossmcp_server::{
    AdapterState, ChannelSink, Gateway, InMemorySessionStore, ServerError, SessionStore,
    TransportKey, TransportProtocol,
};
use std::sync::Arc;

fn gateway_on(store: &Arc<InMemorySessionStore>) -> Gateway {
    Gateway::builder()
        .name("gateway")
        .session_store(Arc::clone(store) as Arc<dyn SessionStore>)
        .build()
        .expect("gateway builds")
}

fn sink() -> Arc<ChannelSink> {
    let (sink, _rx) = ChannelSink::new();
    Arc::new(sink)
}

#[tokio::test]
async fn session_recreation_cross_node() {
    let store = Arc::new(InMemorySessionStore::new());
    let node_a = gateway_on(&store);
    let node_b = gateway_on(&store);

    // Node A creates the session with token T1.
    let adapter_a = node_a
        .transports()
        .create_transporter(TransportProtocol::StreamableHttp, "T1", None, sink())
        .await
        .unwrap();
    let session_id = adapter_a.key().session_id.clone();
    assert_eq!(store.len(), 1);

    // Node B sees the stored record under the same bearer.
    let key = TransportKey::new(TransportProtocol::StreamableHttp, "T1", session_id.clone());
    let record = node_b
        .transports()
        .get_stored_session(&key)
        .await
        .unwrap()
        .expect("record visible cross-node");
    assert_eq!(record.authorization_id, key.auth_hash.as_str());

    // Recreation short-circuits the handshake.
    let adapter_b = node_b
        .transports()
        .recreate_transporter(&key, record, sink())
        .await
        .unwrap();
    assert_eq!(adapter_b.state(), AdapterState::Initialized);
    assert!(node_b.transports().get_transporter(&key).is_some());
}

#[tokio::test]
async fn mismatched_bearer_treats_session_as_absent() {
    let store = Arc::new(InMemorySessionStore::new());
    let node_a = gateway_on(&store);
    let node_b = gateway_on(&store);

    let adapter_a = node_a
        .transports()
        .create_transporter(TransportProtocol::StreamableHttp, "T1", None, sink())
        .await
        .unwrap();
    let session_id = adapter_a.key().session_id.clone();

    // Same session id, different bearer: the record is invisible.
    let wrong_key =
        TransportKey::new(TransportProtocol::StreamableHttp, "T2", session_id.clone());
    assert!(
        node_b
            .transports()
            .get_stored_session(&wrong_key)
            .await
            .unwrap()
            .is_none()
    );

    // obtain() falls through to a fresh session instead of recreating;
    // the unverifiable presented id is not adopted.
    let adapter_b = node_b
        .transports()
        .obtain(
            TransportProtocol::StreamableHttp,
            "T2",
            Some(session_id.clone()),
            sink(),
        )
        .await
        .unwrap();
    assert_eq!(adapter_b.state(), AdapterState::Ready);
    assert_ne!(adapter_b.key().auth_hash, adapter_a.key().auth_hash);
    assert_ne!(adapter_b.key().session_id, session_id);
}

#[tokio::test]
async fn concurrent_create_returns_the_same_adapter() {
    let store = Arc::new(InMemorySessionStore::new());
    let gateway = gateway_on(&store);

    let (first, second) = tokio::join!(
        gateway.transports().create_transporter(
            TransportProtocol::StreamableHttp,
            "T",
            Some("mutex-sess".to_string()),
            sink(),
        ),
        gateway.transports().create_transporter(
            TransportProtocol::StreamableHttp,
            "T",
            Some("mutex-sess".to_string()),
            sink(),
        ),
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(gateway.transports().live_count(), 1);
    assert_eq!(store.len(), 1, "exactly one record persisted");
}

#[tokio::test]
async fn destroy_then_was_session_created() {
    let store = Arc::new(InMemorySessionStore::new());
    let gateway = gateway_on(&store);

    let adapter = gateway
        .transports()
        .create_transporter(TransportProtocol::StreamableHttp, "T", None, sink())
        .await
        .unwrap();
    let key = adapter.key().clone();

    gateway.transports().destroy_transporter(&key).await.unwrap();

    assert!(gateway.transports().was_session_created(&key));
    assert!(gateway.transports().get_transporter(&key).is_none());
    assert!(store.get(&key.session_id).await.unwrap().is_none());
    assert_eq!(adapter.state(), AdapterState::Destroyed);

    // A second destroy finds no resident adapter.
    assert!(matches!(
        gateway.transports().destroy_transporter(&key).await,
        Err(ServerError::InvalidSession { .. })
    ));
}

#[tokio::test]
async fn stateless_sessions_are_never_persisted() {
    let store = Arc::new(InMemorySessionStore::new());
    let gateway = gateway_on(&store);

    let adapter = gateway
        .transports()
        .create_transporter(TransportProtocol::StatelessHttp, "T", None, sink())
        .await
        .unwrap();

    // Id generator disabled, nothing written to the store.
    assert_eq!(adapter.key().session_id, "stateless");
    assert!(store.is_empty());

    let key = adapter.key().clone();
    assert!(
        !gateway
            .transports()
            .was_session_created_async(&TransportKey::new(
                TransportProtocol::StatelessHttp,
                "other-token",
                key.session_id.clone(),
            ))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn was_session_created_async_consults_the_store() {
    let store = Arc::new(InMemorySessionStore::new());
    let node_a = gateway_on(&store);
    let node_b = gateway_on(&store);

    let adapter = node_a
        .transports()
        .create_transporter(TransportProtocol::StreamableHttp, "T1", None, sink())
        .await
        .unwrap();
    let session_id = adapter.key().session_id.clone();

    let key = TransportKey::new(TransportProtocol::StreamableHttp, "T1", session_id.clone());
    assert!(!node_b.transports().was_session_created(&key));
    assert!(node_b.transports().was_session_created_async(&key).await.unwrap());

    let wrong = TransportKey::new(TransportProtocol::StreamableHttp, "T2", session_id);
    assert!(!node_b.transports().was_session_created_async(&wrong).await.unwrap());
}

#[tokio::test]
async fn idle_adapters_are_swept() {
    let store = Arc::new(InMemorySessionStore::new());
    let gateway = gateway_on(&store);

    gateway
        .transports()
        .create_transporter(TransportProtocol::StreamableHttp, "T", None, sink())
        .await
        .unwrap();
    assert_eq!(gateway.transports().live_count(), 1);

    // Nothing is idle past an hour yet.
    assert_eq!(
        gateway
            .transports()
            .sweep_idle(std::time::Duration::from_secs(3600))
            .await,
        0
    );
    // Everything is idle past zero.
    assert_eq!(
        gateway
            .transports()
            .sweep_idle(std::time::Duration::ZERO)
            .await,
        1
    );
    assert_eq!(gateway.transports().live_count(), 0);
}
