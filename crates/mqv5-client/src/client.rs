//! MQTT 5 session engine.
//!
//! Split architecture: [`Client`] (cloneable command handle) plus
//! [`EventLoop`] (owns the socket and all session state).
//!
//! ```ignore
//! let (client, mut eventloop) = Client::new("mqtt://localhost", ConnectOptions::new(), ClientOptions::default());
//!
//! tokio::spawn(async move {
//!     client.subscribe(vec![Subscription::new(TopicFilter::new("sensors/#")?)]).await?;
//! });
//!
//! while let Ok(event) = eventloop.poll().await {
//!     if let Event::Packet(Packet::Publish(publish)) = event {
//!         println!("{}: {:?}", publish.topic, publish.payload);
//!     }
//! }
//! ```
//!
//! `poll()` is the single supervisor fiber: it acquires connections,
//! performs the CONNECT/CONNACK handshake, runs the keepalive timer,
//! dispatches inbound packets, and reconnects after failures. User calls
//! go through a command channel and interleave with the reader only at
//! await points; the loop must be polled for them to make progress.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};

use mqv5_core::encode::PINGREQ_BYTES;
use mqv5_core::{
    encode_packet, Auth, Disconnect, Packet, Properties, Publish, SubAck, Subscribe, Subscription,
    TopicFilter, UnsubAck, Unsubscribe,
};

use crate::config::{ClientOptions, ConnectOptions};
use crate::connection::Connection;
use crate::error::{ClientError, Result};
use crate::events::{DisconnectReason, Event};
use crate::replies::{ReplyTable, Resolver};
use crate::session::Session;

const COMMAND_CAPACITY: usize = 16;

/// Commands sent from [`Client`] to [`EventLoop`].
enum Command {
    Publish {
        packet: Publish,
        resp: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        subscriptions: Vec<Subscription>,
        properties: Properties,
        resp: Resolver,
    },
    Unsubscribe {
        filters: Vec<TopicFilter>,
        properties: Properties,
        resp: Resolver,
    },
    Auth {
        packet: Auth,
        resp: oneshot::Sender<Result<()>>,
    },
    Close {
        disconnect: Option<Disconnect>,
        resp: oneshot::Sender<()>,
    },
}

/// Cloneable MQTT client handle.
///
/// All operations require the [`EventLoop`] to be polled concurrently
/// (typically from a spawned task, or with the handle used from one).
#[derive(Clone)]
pub struct Client {
    tx: mpsc::Sender<Command>,
}

impl Client {
    /// Create a client and its event loop. No I/O happens until the
    /// first `poll()`.
    pub fn new(
        address: impl Into<String>,
        connect: ConnectOptions,
        options: ClientOptions,
    ) -> (Client, EventLoop) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let eventloop = EventLoop {
            address: address.into(),
            options,
            rx,
            session: Session::new(connect),
            conn: None,
            ping: None,
            replies: ReplyTable::new(),
            queued: VecDeque::new(),
            closed: false,
            backoff: false,
            supervising: true,
        };
        (Client { tx }, eventloop)
    }

    /// Serialize and write a PUBLISH. Fire-and-forget: acknowledgement
    /// packets for QoS above 0 arrive through the event stream.
    pub async fn publish(&self, packet: Publish) -> Result<()> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Command::Publish { packet, resp })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Subscribe and await the matching SUBACK.
    pub async fn subscribe(&self, subscriptions: Vec<Subscription>) -> Result<SubAck> {
        self.subscribe_with(subscriptions, Properties::default())
            .await
    }

    /// Subscribe with explicit properties (e.g. a subscription
    /// identifier) and await the matching SUBACK.
    pub async fn subscribe_with(
        &self,
        subscriptions: Vec<Subscription>,
        properties: Properties,
    ) -> Result<SubAck> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Command::Subscribe {
                subscriptions,
                properties,
                resp,
            })
            .await
            .map_err(|_| ClientError::Closed)?;
        match rx.await.map_err(|_| ClientError::Closed)?? {
            Packet::SubAck(ack) => Ok(ack),
            _ => Err(ClientError::ConnectionClosed),
        }
    }

    /// Unsubscribe and await the matching UNSUBACK.
    pub async fn unsubscribe(&self, filters: Vec<TopicFilter>) -> Result<UnsubAck> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Command::Unsubscribe {
                filters,
                properties: Properties::default(),
                resp,
            })
            .await
            .map_err(|_| ClientError::Closed)?;
        match rx.await.map_err(|_| ClientError::Closed)?? {
            Packet::UnsubAck(ack) => Ok(ack),
            _ => Err(ClientError::ConnectionClosed),
        }
    }

    /// Write an AUTH packet, used for enhanced-authentication round
    /// trips initiated by the broker.
    pub async fn auth(&self, packet: Auth) -> Result<()> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Command::Auth { packet, resp })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Close the session: best-effort DISCONNECT (normal disconnection),
    /// no further reconnect attempts, stream termination. Safe to call
    /// more than once.
    pub async fn close(&self) -> Result<()> {
        self.close_with(Disconnect::default()).await
    }

    /// Close with an explicit DISCONNECT packet.
    pub async fn close_with(&self, disconnect: Disconnect) -> Result<()> {
        let (resp, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Close {
                disconnect: Some(disconnect),
                resp,
            })
            .await
            .is_err()
        {
            // loop already gone; closing is idempotent
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }
}

/// The supervisor loop driving all MQTT I/O.
pub struct EventLoop {
    address: String,
    options: ClientOptions,
    rx: mpsc::Receiver<Command>,
    session: Session,
    conn: Option<Connection>,
    ping: Option<time::Interval>,
    replies: ReplyTable,
    /// Events produced faster than one per poll (e.g. PingFailed
    /// followed by ConnectionClosed) wait here.
    queued: VecDeque<Event>,
    closed: bool,
    /// Sleep `reconnect_time` before the next attempt.
    backoff: bool,
    /// The supervisor may acquire connections. Cleared by `close()` and
    /// by failures when auto reconnect is disabled.
    supervising: bool,
}

enum Step {
    Read(Result<Option<Packet>>),
    Cmd(Option<Command>),
    Ping,
}

impl EventLoop {
    /// Drive the engine one event forward.
    ///
    /// Yields wire packets in arrival order (SUBACK/UNSUBACK/PINGRESP
    /// are intercepted) interleaved with lifecycle events. Returns
    /// [`ClientError::Closed`] forever once the session has been closed.
    pub async fn poll(&mut self) -> Result<Event> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Ok(event);
            }
            if self.closed {
                return Err(ClientError::Closed);
            }

            if self.conn.is_some() {
                self.connected_step().await;
                continue;
            }

            if !self.supervising {
                // idle: nothing to do until the user acts
                let cmd = self.rx.recv().await;
                self.handle_command(cmd).await;
                continue;
            }

            if self.backoff {
                if !self.sleep_backoff().await {
                    continue;
                }
                self.backoff = false;
            }

            match self.try_connect().await {
                Ok(event) => return Ok(event),
                Err(e) => {
                    if self.options.reconnect_time.is_zero() {
                        self.supervising = false;
                    } else {
                        self.backoff = true;
                    }
                    return Ok(Event::FailedConnectionAttempt {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Acquire a transport and run the CONNECT/CONNACK handshake.
    /// Every handshake failure closes the transport before returning.
    async fn try_connect(&mut self) -> Result<Event> {
        let mut conn = Connection::open(&self.address, self.options.payload_decode_mode).await?;

        match self.handshake(&mut conn).await {
            Ok(event) => {
                self.conn = Some(conn);
                Ok(event)
            }
            Err(e) => {
                conn.shutdown().await;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self, conn: &mut Connection) -> Result<Event> {
        let connect = self.session.connect_packet();
        let bytes = encode_packet(&Packet::Connect(connect), self.session.max_packet_size)?;
        conn.write(bytes).await?;

        let packet = time::timeout(self.options.connect_timeout, conn.read_packet())
            .await
            .map_err(|_| ClientError::ConnectionTimeout)??;
        let Some(Packet::ConnAck(ack)) = packet else {
            return Err(ClientError::ConnectionRefused(
                "expected CONNACK as the first packet".into(),
            ));
        };

        self.session.absorb_connack(&ack);
        self.ping = self.session.ping_interval().map(|period| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            interval
        });
        Ok(Event::Packet(Packet::ConnAck(ack)))
    }

    /// One step of the connected reader loop: next packet, next user
    /// command, or a keepalive tick, whichever completes first.
    async fn connected_step(&mut self) {
        let step = {
            let Some(conn) = self.conn.as_mut() else {
                return;
            };
            if let Some(ping) = self.ping.as_mut() {
                tokio::select! {
                    read = conn.read_packet() => Step::Read(read),
                    cmd = self.rx.recv() => Step::Cmd(cmd),
                    _ = ping.tick() => Step::Ping,
                }
            } else {
                tokio::select! {
                    read = conn.read_packet() => Step::Read(read),
                    cmd = self.rx.recv() => Step::Cmd(cmd),
                }
            }
        };

        match step {
            Step::Read(Ok(Some(packet))) => self.dispatch(packet),
            Step::Read(Ok(None)) => self.teardown(DisconnectReason::ClosedRemotely).await,
            Step::Read(Err(e)) => {
                // decode errors lose stream sync; treat like transport loss
                self.queued.push_back(Event::Error {
                    message: e.to_string(),
                });
                self.teardown(DisconnectReason::ClosedRemotely).await;
            }
            Step::Cmd(cmd) => self.handle_command(cmd).await,
            Step::Ping => self.ping_tick().await,
        }
    }

    /// Route one inbound packet: acknowledgements with waiters resolve
    /// the reply table, PINGRESP feeds the liveness check, everything
    /// else is forwarded in wire order.
    fn dispatch(&mut self, packet: Packet) {
        match packet {
            Packet::SubAck(ack) => {
                let id = ack.packet_id.get();
                if !self.replies.resolve(id, Packet::SubAck(ack)) {
                    log::warn!("SUBACK for unknown packet identifier {id}");
                }
            }
            Packet::UnsubAck(ack) => {
                let id = ack.packet_id.get();
                if !self.replies.resolve(id, Packet::UnsubAck(ack)) {
                    log::warn!("UNSUBACK for unknown packet identifier {id}");
                }
            }
            Packet::PingResp => {
                self.session.last_pingresp = Instant::now();
            }
            other => self.queued.push_back(Event::Packet(other)),
        }
    }

    async fn ping_tick(&mut self) {
        if self.session.ping_overdue() {
            self.queued.push_back(Event::PingFailed);
            self.teardown(DisconnectReason::PingFailed).await;
            return;
        }
        let result = match self.conn.as_mut() {
            Some(conn) => conn.write(Bytes::from_static(PINGREQ_BYTES)).await,
            None => return,
        };
        if let Err(e) = result {
            log::warn!("PINGREQ write failed: {e}");
            self.queued.push_back(Event::Error {
                message: e.to_string(),
            });
            self.teardown(DisconnectReason::ClosedRemotely).await;
        }
    }

    async fn handle_command(&mut self, cmd: Option<Command>) {
        match cmd {
            Some(Command::Publish { packet, resp }) => {
                let result = self.write_packet(Packet::Publish(packet)).await;
                let _ = resp.send(result);
            }
            Some(Command::Subscribe {
                subscriptions,
                properties,
                resp,
            }) => {
                let Ok(packet_id) = self.replies.allocate(resp) else {
                    return;
                };
                let packet = Packet::Subscribe(Subscribe {
                    packet_id,
                    subscriptions,
                    properties,
                });
                if let Err(e) = self.write_packet(packet).await {
                    if let Some(resolver) = self.replies.take(packet_id.get()) {
                        let _ = resolver.send(Err(e));
                    }
                }
            }
            Some(Command::Unsubscribe {
                filters,
                properties,
                resp,
            }) => {
                let Ok(packet_id) = self.replies.allocate(resp) else {
                    return;
                };
                let packet = Packet::Unsubscribe(Unsubscribe {
                    packet_id,
                    filters,
                    properties,
                });
                if let Err(e) = self.write_packet(packet).await {
                    if let Some(resolver) = self.replies.take(packet_id.get()) {
                        let _ = resolver.send(Err(e));
                    }
                }
            }
            Some(Command::Auth { packet, resp }) => {
                let result = self.write_packet(Packet::Auth(packet)).await;
                let _ = resp.send(result);
            }
            Some(Command::Close { disconnect, resp }) => {
                self.close_internal(disconnect).await;
                let _ = resp.send(());
            }
            None => {
                // every Client handle dropped: clean shutdown
                self.close_internal(None).await;
            }
        }
    }

    /// Encode against the negotiated maximum packet size and write.
    /// Encode errors come back synchronously and leave the connection up.
    async fn write_packet(&mut self, packet: Packet) -> Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        let bytes = encode_packet(&packet, self.session.max_packet_size)?;
        conn.write(bytes).await
    }

    async fn close_internal(&mut self, disconnect: Option<Disconnect>) {
        if self.closed {
            return;
        }
        if let Some(conn) = self.conn.as_mut() {
            // best effort; the transport is going away regardless
            let disconnect = disconnect.unwrap_or_default();
            if let Ok(bytes) = encode_packet(
                &Packet::Disconnect(disconnect),
                self.session.max_packet_size,
            ) {
                let _ = conn.write(bytes).await;
            }
        }
        self.teardown(DisconnectReason::ClosedLocally).await;
        self.closed = true;
        self.supervising = false;
        self.rx.close();
    }

    /// Stop the keepalive timer, drop the transport, reject all pending
    /// replies, and emit `ConnectionClosed`.
    async fn teardown(&mut self, reason: DisconnectReason) {
        self.ping = None;
        if let Some(mut conn) = self.conn.take() {
            conn.shutdown().await;
        }
        self.replies.reject_all();
        self.queued.push_back(Event::ConnectionClosed { reason });
        if reason != DisconnectReason::ClosedLocally && self.options.reconnect_time.is_zero() {
            self.supervising = false;
        }
    }

    /// Wait out the reconnect delay, still serving user commands.
    /// Returns false when a command changed the supervisor state.
    async fn sleep_backoff(&mut self) -> bool {
        let sleep = time::sleep(self.options.reconnect_time);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = self.rx.recv() => {
                    self.handle_command(cmd).await;
                    if self.closed || !self.supervising {
                        return false;
                    }
                }
            }
        }
    }
}
