//! Session engine tests against an in-process scripted broker.
//!
//! Each test binds a localhost listener, speaks just enough MQTT 5 from
//! the broker side (via the core codec), and asserts on the engine's
//! event stream and operation results.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use mqv5_client::{
    reason_code, Client, ClientOptions, ConnAck, ConnectOptions, DisconnectReason, Event,
    EventLoop, Packet, Payload, Properties, QoS, SubAck, Subscription, Topic, TopicFilter,
};
use mqv5_core::{decode_packet, encode_packet, PacketId, PayloadDecodeMode, Reassembler};

const WAIT: Duration = Duration::from_secs(5);

/// Broker side of one accepted connection.
struct BrokerConn {
    stream: TcpStream,
    reassembler: Reassembler,
}

impl BrokerConn {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _addr) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        Self {
            stream,
            reassembler: Reassembler::new(PayloadDecodeMode::FormatIndicator),
        }
    }

    async fn read_packet(&mut self) -> Packet {
        loop {
            if let Some(packet) = self.reassembler.next_packet().unwrap() {
                return packet;
            }
            let mut buf = [0u8; 1024];
            let n = timeout(WAIT, self.stream.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "client closed the connection unexpectedly");
            self.reassembler.feed(&buf[..n]);
        }
    }

    async fn write_packet(&mut self, packet: &Packet) {
        let bytes = encode_packet(packet, 0).unwrap();
        self.stream.write_all(&bytes).await.unwrap();
    }

    /// Read the CONNECT and answer it.
    async fn handshake(&mut self, connack: ConnAck) -> mqv5_core::Connect {
        let Packet::Connect(connect) = self.read_packet().await else {
            panic!("expected CONNECT first");
        };
        self.write_packet(&Packet::ConnAck(connack)).await;
        connect
    }
}

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("mqtt://127.0.0.1:{}", listener.local_addr().unwrap().port());
    (listener, address)
}

/// Drive the event loop from a task, forwarding its events.
fn spawn_loop(mut eventloop: EventLoop) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok(event) = eventloop.poll().await {
            if tx.send(event).is_err() {
                break;
            }
        }
    });
    rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(WAIT, rx.recv()).await.unwrap().expect("stream ended")
}

#[tokio::test]
async fn connect_handshake_and_close() {
    let (listener, address) = listener().await;

    let broker = tokio::spawn(async move {
        let mut conn = BrokerConn::accept(&listener).await;
        let connect = conn
            .handshake(ConnAck {
                session_present: false,
                reason_code: reason_code::SUCCESS,
                properties: Properties {
                    assigned_client_identifier: Some("auto-1".into()),
                    ..Properties::default()
                },
            })
            .await;
        // template defaults: broker-assigned id, clean start, 5 s keepalive
        assert!(connect.client_id.is_empty());
        assert!(connect.clean_start);
        assert_eq!(connect.keep_alive, 5);

        // the engine announces the close with a DISCONNECT
        let Packet::Disconnect(disconnect) = conn.read_packet().await else {
            panic!("expected DISCONNECT");
        };
        assert_eq!(disconnect.reason_code, reason_code::NORMAL_DISCONNECTION);
    });

    let (client, eventloop) = Client::new(address, ConnectOptions::new(), ClientOptions::default());
    let mut events = spawn_loop(eventloop);

    let Event::Packet(Packet::ConnAck(ack)) = next_event(&mut events).await else {
        panic!("expected CONNACK event");
    };
    assert_eq!(ack.reason_code, reason_code::SUCCESS);
    assert_eq!(
        ack.properties.assigned_client_identifier.as_deref(),
        Some("auto-1")
    );

    client.close().await.unwrap();
    let Event::ConnectionClosed { reason } = next_event(&mut events).await else {
        panic!("expected ConnectionClosed");
    };
    assert_eq!(reason, DisconnectReason::ClosedLocally);

    // the stream terminates exactly once
    assert!(timeout(WAIT, events.recv()).await.unwrap().is_none());
    broker.await.unwrap();
}

#[tokio::test]
async fn subscribe_resolves_with_matching_suback() {
    let (listener, address) = listener().await;

    let broker = tokio::spawn(async move {
        let mut conn = BrokerConn::accept(&listener).await;
        conn.handshake(ConnAck::default()).await;

        // a stray SUBACK for an unknown identifier is logged and ignored
        conn.write_packet(&Packet::SubAck(SubAck {
            packet_id: PacketId::new(42).unwrap(),
            reason_codes: vec![reason_code::GRANTED_QOS_0],
            properties: Properties::default(),
        }))
        .await;

        let Packet::Subscribe(subscribe) = conn.read_packet().await else {
            panic!("expected SUBSCRIBE");
        };
        assert_eq!(subscribe.packet_id.get(), 1);
        assert_eq!(subscribe.subscriptions.len(), 1);
        assert_eq!(subscribe.subscriptions[0].filter.as_str(), "#");
        assert!(subscribe.subscriptions[0].retain_as_published);

        conn.write_packet(&Packet::SubAck(SubAck {
            packet_id: subscribe.packet_id,
            reason_codes: vec![reason_code::GRANTED_QOS_1],
            properties: Properties::default(),
        }))
        .await;

        // hold the connection open until the client closes
        let _ = conn.read_packet().await;
    });

    let (client, eventloop) = Client::new(address, ConnectOptions::new(), ClientOptions::default());
    let mut events = spawn_loop(eventloop);

    let Event::Packet(Packet::ConnAck(_)) = next_event(&mut events).await else {
        panic!("expected CONNACK event");
    };

    let subscription = Subscription::new(TopicFilter::new("#").unwrap())
        .qos(QoS::AtLeastOnce)
        .retain_as_published(true);
    let ack = timeout(WAIT, client.subscribe(vec![subscription]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ack.packet_id.get(), 1);
    assert_eq!(ack.reason_codes, vec![reason_code::GRANTED_QOS_1]);

    client.close().await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn publish_roundtrip_through_broker() {
    let (listener, address) = listener().await;

    let broker = tokio::spawn(async move {
        let mut conn = BrokerConn::accept(&listener).await;
        conn.handshake(ConnAck::default()).await;

        let Packet::Publish(publish) = conn.read_packet().await else {
            panic!("expected PUBLISH");
        };
        assert_eq!(publish.topic.as_str(), "a/b");
        assert!(publish.retain);
        assert_eq!(publish.qos, QoS::AtMostOnce);
        assert_eq!(publish.packet_id, None);
        // the encoder derived the format indicator from the payload type
        assert_eq!(publish.properties.payload_format_indicator, Some(1));

        // echo it back to the subscriber side
        conn.write_packet(&Packet::Publish(publish)).await;
        let _ = conn.read_packet().await;
    });

    let (client, eventloop) = Client::new(address, ConnectOptions::new(), ClientOptions::default());
    let mut events = spawn_loop(eventloop);

    let Event::Packet(Packet::ConnAck(_)) = next_event(&mut events).await else {
        panic!("expected CONNACK event");
    };

    let publish = mqv5_client::Publish::new(Topic::new("a/b").unwrap(), "hello").retain(true);
    client.publish(publish).await.unwrap();

    let Event::Packet(Packet::Publish(echoed)) = next_event(&mut events).await else {
        panic!("expected the echoed PUBLISH");
    };
    assert_eq!(echoed.payload, Payload::Utf8("hello".into()));
    assert!(echoed.retain);

    client.close().await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn failed_attempts_emit_events_and_retry() {
    // grab a port with nothing listening on it
    let (listener, address) = listener().await;
    drop(listener);

    let options = ClientOptions::default().reconnect_time(Duration::from_millis(50));
    let (client, eventloop) = Client::new(address, ConnectOptions::new(), options);
    let mut events = spawn_loop(eventloop);

    for _ in 0..2 {
        let Event::FailedConnectionAttempt { .. } = next_event(&mut events).await else {
            panic!("expected FailedConnectionAttempt");
        };
    }

    // close() wins over the backoff sleep and stops the retrying
    client.close().await.unwrap();
    loop {
        match timeout(WAIT, events.recv()).await.unwrap() {
            Some(Event::FailedConnectionAttempt { .. }) => continue,
            Some(Event::ConnectionClosed { reason }) => {
                assert_eq!(reason, DisconnectReason::ClosedLocally);
                break;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(timeout(WAIT, events.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn remote_close_reconnects_with_session_state() {
    let (listener, address) = listener().await;

    let broker = tokio::spawn(async move {
        // first connection: assign an identifier, then drop the transport
        let mut conn = BrokerConn::accept(&listener).await;
        let connect = conn
            .handshake(ConnAck {
                session_present: false,
                reason_code: reason_code::SUCCESS,
                properties: Properties {
                    assigned_client_identifier: Some("auto-9".into()),
                    ..Properties::default()
                },
            })
            .await;
        assert!(connect.client_id.is_empty());
        drop(conn);

        // the resumed session reuses the assigned identifier
        let mut conn = BrokerConn::accept(&listener).await;
        let connect = conn.handshake(ConnAck::default()).await;
        assert_eq!(connect.client_id.as_str(), "auto-9");
        let _ = conn.read_packet().await;
    });

    let options = ClientOptions::default().reconnect_time(Duration::from_millis(50));
    let (client, eventloop) = Client::new(address, ConnectOptions::new(), options);
    let mut events = spawn_loop(eventloop);

    let Event::Packet(Packet::ConnAck(_)) = next_event(&mut events).await else {
        panic!("expected first CONNACK");
    };
    let Event::ConnectionClosed { reason } = next_event(&mut events).await else {
        panic!("expected ConnectionClosed");
    };
    assert_eq!(reason, DisconnectReason::ClosedRemotely);

    // reconnect events may include failed attempts while the broker is
    // between accepts; wait for the second CONNACK
    loop {
        match next_event(&mut events).await {
            Event::Packet(Packet::ConnAck(_)) => break,
            Event::FailedConnectionAttempt { .. } => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    client.close().await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn missing_pingresp_fails_liveness() {
    let (listener, address) = listener().await;

    let broker = tokio::spawn(async move {
        let mut conn = BrokerConn::accept(&listener).await;
        conn.handshake(ConnAck::default()).await;

        // swallow PINGREQs without answering
        loop {
            match conn.read_packet().await {
                Packet::PingReq => continue,
                _ => break,
            }
        }
    });

    let options = ClientOptions::default().reconnect_time(Duration::ZERO);
    let connect = ConnectOptions::new().keep_alive(1);
    let (_client, eventloop) = Client::new(address, connect, options);
    let mut events = spawn_loop(eventloop);

    let Event::Packet(Packet::ConnAck(_)) = next_event(&mut events).await else {
        panic!("expected CONNACK");
    };
    let Event::PingFailed = next_event(&mut events).await else {
        panic!("expected PingFailed");
    };
    let Event::ConnectionClosed { reason } = next_event(&mut events).await else {
        panic!("expected ConnectionClosed");
    };
    assert_eq!(reason, DisconnectReason::PingFailed);

    broker.abort();
}

#[tokio::test]
async fn answered_pings_keep_the_session_alive() {
    let (listener, address) = listener().await;

    let broker = tokio::spawn(async move {
        let mut conn = BrokerConn::accept(&listener).await;
        conn.handshake(ConnAck::default()).await;
        loop {
            match conn.read_packet().await {
                Packet::PingReq => conn.write_packet(&Packet::PingResp).await,
                _ => break,
            }
        }
    });

    let connect = ConnectOptions::new().keep_alive(1);
    let (client, eventloop) = Client::new(address, connect, ClientOptions::default());
    let mut events = spawn_loop(eventloop);

    let Event::Packet(Packet::ConnAck(_)) = next_event(&mut events).await else {
        panic!("expected CONNACK");
    };

    // survive two ping intervals; PINGRESPs are intercepted, so nothing
    // else shows up
    let quiet = timeout(Duration::from_millis(2500), events.recv()).await;
    assert!(quiet.is_err(), "unexpected event during keepalive exchange");

    client.close().await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn zero_keepalive_sends_no_pings() {
    let (listener, address) = listener().await;

    let broker = tokio::spawn(async move {
        let mut conn = BrokerConn::accept(&listener).await;
        let connect = conn.handshake(ConnAck::default()).await;
        assert_eq!(connect.keep_alive, 0);

        // nothing must arrive until the closing DISCONNECT
        let packet = conn.read_packet().await;
        assert!(
            matches!(packet, Packet::Disconnect(_)),
            "unexpected packet: {packet:?}"
        );
    });

    let connect = ConnectOptions::new().keep_alive(0);
    let (client, eventloop) = Client::new(address, connect, ClientOptions::default());
    let mut events = spawn_loop(eventloop);

    let Event::Packet(Packet::ConnAck(_)) = next_event(&mut events).await else {
        panic!("expected CONNACK");
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    client.close().await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn close_is_idempotent() {
    let (listener, address) = listener().await;

    let broker = tokio::spawn(async move {
        let mut conn = BrokerConn::accept(&listener).await;
        conn.handshake(ConnAck::default()).await;
        let _ = conn.read_packet().await;
    });

    let (client, eventloop) = Client::new(address, ConnectOptions::new(), ClientOptions::default());
    let mut events = spawn_loop(eventloop);

    let Event::Packet(Packet::ConnAck(_)) = next_event(&mut events).await else {
        panic!("expected CONNACK");
    };

    client.close().await.unwrap();
    client.close().await.unwrap();

    let mut closed_events = 0;
    while let Some(event) = timeout(WAIT, events.recv()).await.unwrap() {
        if matches!(event, Event::ConnectionClosed { .. }) {
            closed_events += 1;
        }
    }
    assert_eq!(closed_events, 1);

    // operations after close fail cleanly
    let publish = mqv5_client::Publish::new(Topic::new("t").unwrap(), "x");
    assert!(client.publish(publish).await.is_err());

    broker.await.unwrap();
}

#[tokio::test]
async fn pending_subscribe_rejected_on_disconnect() {
    let (listener, address) = listener().await;

    let broker = tokio::spawn(async move {
        let mut conn = BrokerConn::accept(&listener).await;
        conn.handshake(ConnAck::default()).await;

        // read the SUBSCRIBE, then cut the connection without answering
        let Packet::Subscribe(_) = conn.read_packet().await else {
            panic!("expected SUBSCRIBE");
        };
    });

    let options = ClientOptions::default().reconnect_time(Duration::ZERO);
    let (client, eventloop) = Client::new(address, ConnectOptions::new(), options);
    let mut events = spawn_loop(eventloop);

    let Event::Packet(Packet::ConnAck(_)) = next_event(&mut events).await else {
        panic!("expected CONNACK");
    };

    let result = timeout(
        WAIT,
        client.subscribe(vec![Subscription::new(TopicFilter::new("a/#").unwrap())]),
    )
    .await
    .unwrap();
    assert!(result.is_err(), "subscribe must be rejected on disconnect");

    broker.await.unwrap();
}

#[tokio::test]
async fn publish_without_connection_is_not_connected() {
    let (listener, address) = listener().await;
    drop(listener);

    let options = ClientOptions::default().reconnect_time(Duration::ZERO);
    let (client, eventloop) = Client::new(address, ConnectOptions::new(), options);
    let mut events = spawn_loop(eventloop);

    let Event::FailedConnectionAttempt { .. } = next_event(&mut events).await else {
        panic!("expected FailedConnectionAttempt");
    };

    let publish = mqv5_client::Publish::new(Topic::new("t").unwrap(), "x");
    let err = client.publish(publish).await.unwrap_err();
    assert!(matches!(err, mqv5_client::ClientError::NotConnected));

    client.close().await.unwrap();
}

#[tokio::test]
async fn decode_failure_is_reported_and_reconnects() {
    let (listener, address) = listener().await;

    let broker = tokio::spawn(async move {
        let mut conn = BrokerConn::accept(&listener).await;
        conn.handshake(ConnAck::default()).await;
        // garbage: reserved packet type 0
        conn.stream.write_all(&[0x00, 0x00]).await.unwrap();

        // the engine drops the transport and dials again
        let mut conn = BrokerConn::accept(&listener).await;
        conn.handshake(ConnAck::default()).await;
        let _ = conn.read_packet().await;
    });

    let options = ClientOptions::default().reconnect_time(Duration::from_millis(50));
    let (client, eventloop) = Client::new(address, ConnectOptions::new(), options);
    let mut events = spawn_loop(eventloop);

    let Event::Packet(Packet::ConnAck(_)) = next_event(&mut events).await else {
        panic!("expected CONNACK");
    };
    let Event::Error { .. } = next_event(&mut events).await else {
        panic!("expected Error");
    };
    let Event::ConnectionClosed { reason } = next_event(&mut events).await else {
        panic!("expected ConnectionClosed");
    };
    assert_eq!(reason, DisconnectReason::ClosedRemotely);

    loop {
        match next_event(&mut events).await {
            Event::Packet(Packet::ConnAck(_)) => break,
            Event::FailedConnectionAttempt { .. } => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    client.close().await.unwrap();
    broker.await.unwrap();
}

/// The raw codec path the tests above rely on: scenario 6 of the wire
/// fixtures, pushed through a fresh reassembler byte by byte.
#[test]
fn fixture_stream_fragmented_to_single_bytes() {
    let connack = encode_packet(&Packet::ConnAck(ConnAck::default()), 0).unwrap();
    let publish = encode_packet(
        &Packet::Publish(mqv5_client::Publish::new(Topic::new("a/b").unwrap(), "hi").retain(true)),
        0,
    )
    .unwrap();

    let mut stream = Vec::new();
    stream.extend_from_slice(&connack);
    stream.extend_from_slice(&publish);

    let mut reassembler = Reassembler::new(PayloadDecodeMode::FormatIndicator);
    let mut packets = Vec::new();
    for &byte in &stream {
        reassembler.feed(&[byte]);
        while let Some(packet) = reassembler.next_packet().unwrap() {
            packets.push(packet);
        }
    }

    assert_eq!(packets.len(), 2);
    assert!(matches!(packets[0], Packet::ConnAck(_)));
    assert!(matches!(&packets[1], Packet::Publish(p) if p.retain));
    assert_eq!(reassembler.carry_len(), 0);

    // sanity: whole-buffer decode agrees
    let (first, consumed) = decode_packet(&stream, PayloadDecodeMode::FormatIndicator)
        .unwrap()
        .unwrap();
    assert_eq!(first, packets[0]);
    assert_eq!(consumed, connack.len());
}
