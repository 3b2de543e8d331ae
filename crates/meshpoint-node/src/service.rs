//! The store service: bus subscriptions, write linearization,
//! request dispatch.
//!
//! One task per subscription; every task selects on its message
//! stream and the shutdown watch channel. Handler bodies never panic
//! the runtime — a panicking task dies alone, the sibling
//! subscriptions keep being serviced.
//!
//! Mutating handlers serialize through [`StoreService::write_lock`],
//! so the store observes a linear history and a reply implies the
//! write is visible to subsequent reads. Read handlers take no lock.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use meshpoint_bus::{subject, Bus, BusMsg, Subscription};
use meshpoint_proto::{
    decode_edge_points_msg, decode_message, decode_node_points_msg, decode_notification,
    decode_points, decode_request, encode_nodes_reply,
};
use meshpoint_storage::StoreEngine;
use meshpoint_types::config::AppConfig;
use meshpoint_types::{node_type, point, point_type, NodeEdge, Point, Result, User};

use crate::auth::{TokenIssuer, UuidTokener};
use crate::metrics::{PendingDepths, ServiceMetrics};
use crate::notify::{LogGateway, MsgGateway};
use crate::propagate::{LogSink, PointSink};
use crate::updates::UpdateTracker;
use crate::{metrics, notify, propagate, schedule};

// ---------------------------------------------------------------------------
// StoreService
// ---------------------------------------------------------------------------

/// Owns the store and mediates every read and write through the bus.
///
/// Constructed at startup and injected wherever needed — never
/// module-level state, so tests run several isolated instances.
pub struct StoreService {
    store: Arc<StoreEngine>,
    bus: Bus,
    config: AppConfig,
    tokener: Arc<dyn TokenIssuer>,
    gateway: Arc<dyn MsgGateway>,
    sink: Arc<dyn PointSink>,
    write_lock: tokio::sync::Mutex<()>,
    metrics: ServiceMetrics,
    updates: UpdateTracker,
}

impl StoreService {
    /// Creates a service with the default seams (random tokens, a
    /// logging gateway, and a logging sink).
    pub fn new(store: Arc<StoreEngine>, bus: Bus, config: AppConfig) -> Self {
        Self {
            store,
            bus,
            config,
            tokener: Arc::new(UuidTokener),
            gateway: Arc::new(LogGateway),
            sink: Arc::new(LogSink),
            write_lock: tokio::sync::Mutex::new(()),
            metrics: ServiceMetrics::default(),
            updates: UpdateTracker::default(),
        }
    }

    /// Replaces the token issuer.
    pub fn with_tokener(mut self, tokener: Arc<dyn TokenIssuer>) -> Self {
        self.tokener = tokener;
        self
    }

    /// Replaces the outbound message gateway.
    pub fn with_gateway(mut self, gateway: Arc<dyn MsgGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    /// Replaces the time-series sink.
    pub fn with_sink(mut self, sink: Arc<dyn PointSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The persistent store.
    pub fn store(&self) -> &StoreEngine {
        &self.store
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.bus
    }

    pub(crate) fn config(&self) -> &AppConfig {
        &self.config
    }

    pub(crate) fn gateway(&self) -> &dyn MsgGateway {
        self.gateway.as_ref()
    }

    pub(crate) fn sink(&self) -> &dyn PointSink {
        self.sink.as_ref()
    }

    pub(crate) fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    pub(crate) fn updates(&self) -> &UpdateTracker {
        &self.updates
    }

    pub(crate) fn write_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.write_lock
    }

    /// Subscribes to every core subject and spawns the handler tasks,
    /// the schedule sweeper, and the metrics reporter.
    pub fn start(self) -> Result<ServiceHandle> {
        self.config.validate()?;
        let svc = Arc::new(self);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sub_node_points = svc.bus.subscribe(subject::NODE_POINTS_PATTERN)?;
        let sub_edge_points = svc.bus.subscribe(subject::EDGE_POINTS_PATTERN)?;
        let sub_node = svc.bus.subscribe(subject::NODE_PATTERN)?;
        let sub_children = svc.bus.subscribe(subject::NODE_CHILDREN_PATTERN)?;
        let sub_not = svc.bus.subscribe(subject::NODE_NOT_PATTERN)?;
        let sub_msg = svc.bus.subscribe(subject::NODE_MSG_PATTERN)?;
        let sub_auth = svc.bus.subscribe(subject::AUTH_USER)?;

        let depths = PendingDepths {
            node_points: sub_node_points.depth_handle(),
            edge_points: sub_edge_points.depth_handle(),
        };

        let subs = [
            (Handler::NodePoints, sub_node_points),
            (Handler::EdgePoints, sub_edge_points),
            (Handler::Node, sub_node),
            (Handler::NodeChildren, sub_children),
            (Handler::Notification, sub_not),
            (Handler::Message, sub_msg),
            (Handler::Auth, sub_auth),
        ];

        let mut tasks: Vec<JoinHandle<()>> = subs
            .into_iter()
            .map(|(handler, sub)| {
                tokio::spawn(run_subscription(
                    svc.clone(),
                    sub,
                    handler,
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        tasks.push(tokio::spawn(schedule::run_sweeper(
            svc.clone(),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(metrics::run_reporter(
            svc.clone(),
            depths,
            shutdown_rx,
        )));

        tracing::info!(
            root = %svc.store.root_id(),
            server = %svc.config.server,
            "store service started"
        );

        Ok(ServiceHandle {
            svc,
            shutdown_tx,
            tasks,
        })
    }
}

// ---------------------------------------------------------------------------
// ServiceHandle
// ---------------------------------------------------------------------------

/// Running service: keeps the task handles and the shutdown channel.
pub struct ServiceHandle {
    svc: Arc<StoreService>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    /// The running service, for direct calls (software updates) and
    /// tests.
    pub fn service(&self) -> &Arc<StoreService> {
        &self.svc
    }

    /// Signals every task to stop, waits for them, and flushes the
    /// store.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(%e, "service task ended abnormally");
            }
        }
        if let Err(e) = self.svc.store.flush() {
            tracing::warn!(%e, "store flush on shutdown failed");
        }
        tracing::info!("store service stopped");
    }
}

// ---------------------------------------------------------------------------
// Subscription loop
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
enum Handler {
    NodePoints,
    EdgePoints,
    Node,
    NodeChildren,
    Notification,
    Message,
    Auth,
}

async fn run_subscription(
    svc: Arc<StoreService>,
    mut sub: Subscription,
    handler: Handler,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            msg = sub.recv() => {
                match msg {
                    Some(msg) => dispatch(&svc, handler, msg).await,
                    None => break,
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!(?handler, "subscription task exited");
}

async fn dispatch(svc: &StoreService, handler: Handler, msg: BusMsg) {
    match handler {
        Handler::NodePoints => svc.handle_node_points(&msg).await,
        Handler::EdgePoints => svc.handle_edge_points(&msg).await,
        Handler::Node => svc.handle_node(&msg),
        Handler::NodeChildren => svc.handle_node_children(&msg),
        Handler::Notification => svc.handle_notification(&msg),
        Handler::Message => svc.handle_message(&msg),
        Handler::Auth => svc.handle_auth(&msg),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

impl StoreService {
    /// `node.<id>.points` — merge and propagate.
    async fn handle_node_points(&self, msg: &BusMsg) {
        let start = Instant::now();
        let result = self.node_points_inner(msg).await;
        self.metrics.node_point.sample(start.elapsed());

        match result {
            Ok(()) => self.bus.respond(msg, Vec::new()),
            Err(e) => {
                tracing::warn!(subject = %msg.subject, %e, "node points write failed");
                self.bus.respond(msg, e.to_string().into_bytes());
            }
        }
    }

    async fn node_points_inner(&self, msg: &BusMsg) -> Result<()> {
        let (node_id, points) = decode_node_points_msg(&msg.subject, &msg.payload)?;

        let _guard = self.write_lock.lock().await;
        self.store.merge_points(&node_id, &points)?;

        // propagation errors are logged, not replied — the write is
        // already committed
        let desc = self
            .store
            .node(&node_id)
            .map(|n| n.desc())
            .unwrap_or_default();
        let mut visited = HashSet::new();
        let propagated = propagate::process_points_upstream(
            self,
            &node_id,
            &node_id,
            &desc,
            &points,
            &mut visited,
            true,
            Utc::now(),
        );
        if let Err(e) = propagated {
            tracing::warn!(node = %node_id, %e, "upstream propagation failed");
        }

        Ok(())
    }

    /// `node.<parent>.<child>.points` — merge edge points and
    /// propagate from the child.
    async fn handle_edge_points(&self, msg: &BusMsg) {
        let start = Instant::now();
        let result = self.edge_points_inner(msg).await;
        self.metrics.edge_point.sample(start.elapsed());

        match result {
            Ok(()) => self.bus.respond(msg, Vec::new()),
            Err(e) => {
                tracing::warn!(subject = %msg.subject, %e, "edge points write failed");
                self.bus.respond(msg, e.to_string().into_bytes());
            }
        }
    }

    async fn edge_points_inner(&self, msg: &BusMsg) -> Result<()> {
        let (parent_id, child_id, points) =
            decode_edge_points_msg(&msg.subject, &msg.payload)?;

        let _guard = self.write_lock.lock().await;
        self.store.merge_edge_points(&child_id, &parent_id, &points)?;

        let desc = self
            .store
            .node(&child_id)
            .map(|n| n.desc())
            .unwrap_or_default();
        let mut visited = HashSet::new();
        let propagated = propagate::process_points_upstream(
            self,
            &child_id,
            &child_id,
            &desc,
            &points,
            &mut visited,
            false,
            Utc::now(),
        );
        if let Err(e) = propagated {
            tracing::warn!(node = %child_id, %e, "upstream propagation failed");
        }

        Ok(())
    }

    /// `node.<id>` — read a node; the payload selects the parent view
    /// (`"all"`, empty for primary, or a specific parent id).
    fn handle_node(&self, msg: &BusMsg) {
        let start = Instant::now();

        let mut nodes: Vec<NodeEdge> = Vec::new();
        let mut error = String::new();

        let chunks: Vec<&str> = msg.subject.split('.').collect();
        if chunks.len() != 2 {
            error = format!("bad node subject: {}", msg.subject);
        } else {
            let node_id = chunks[1];
            let parent = String::from_utf8_lossy(&msg.payload).to_string();
            match self.store.node_edge(node_id, &parent) {
                Ok(mut found) => {
                    if parent == "all" {
                        found.retain(|n| !n.is_tombstone());
                    }
                    nodes = found;
                }
                Err(e) => error = e.to_string(),
            }
        }

        self.metrics.node.sample(start.elapsed());
        self.bus.respond(msg, encode_nodes_reply(&nodes, &error));
    }

    /// `node.<id>.children` — list direct descendants.
    fn handle_node_children(&self, msg: &BusMsg) {
        let start = Instant::now();

        let mut nodes: Vec<NodeEdge> = Vec::new();
        let mut error = String::new();

        let chunks: Vec<&str> = msg.subject.split('.').collect();
        if chunks.len() != 3 {
            error = format!("bad children subject: {}", msg.subject);
        } else {
            match decode_request(&msg.payload) {
                Ok((typ, include_del)) => {
                    match self.store.descendants(chunks[1], &typ, false, include_del) {
                        Ok(found) => nodes = found,
                        Err(e) => error = e.to_string(),
                    }
                }
                Err(e) => error = e.to_string(),
            }
        }

        self.metrics.node_children.sample(start.elapsed());
        self.bus.respond(msg, encode_nodes_reply(&nodes, &error));
    }

    /// `node.<id>.not` — fan a notification out to users.
    fn handle_notification(&self, msg: &BusMsg) {
        let chunks: Vec<&str> = msg.subject.split('.').collect();
        if chunks.len() != 3 {
            tracing::warn!(subject = %msg.subject, "bad notification subject");
            return;
        }

        let not = match decode_notification(&msg.payload) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(subject = %msg.subject, %e, "bad notification payload");
                return;
            }
        };

        if let Err(e) = notify::handle_notification(self, chunks[1], &not) {
            tracing::warn!(node = %chunks[1], %e, "notification fan-out failed");
        }
    }

    /// `node.<id>.msg` — deliver a rendered message outbound.
    fn handle_message(&self, msg: &BusMsg) {
        let chunks: Vec<&str> = msg.subject.split('.').collect();
        if chunks.len() != 3 {
            tracing::warn!(subject = %msg.subject, "bad message subject");
            return;
        }

        let message = match decode_message(&msg.payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(subject = %msg.subject, %e, "bad message payload");
                return;
            }
        };

        if let Err(e) = notify::deliver_message(self, chunks[1], &message) {
            tracing::warn!(node = %chunks[1], %e, "message delivery failed");
        }
    }

    /// `auth.user` — log a user in.
    ///
    /// Any failure replies with an *empty* payload; the reply never
    /// discloses whether the email exists.
    fn handle_auth(&self, msg: &BusMsg) {
        let deny = |why: &str| {
            tracing::info!(why, "login rejected");
            self.bus.respond(msg, Vec::new());
        };

        if msg.payload.is_empty() {
            return deny("empty payload");
        }

        let points = match decode_points(&msg.payload) {
            Ok(p) => p,
            Err(_) => return deny("bad payload"),
        };

        let email = point::find_text(&points, point_type::EMAIL);
        let pass = point::find_text(&points, point_type::PASS);
        if email.is_empty() {
            return deny("missing email");
        }

        let mut nodes = match self.store.user_check(&email, &pass) {
            Ok(found) if !found.is_empty() => found,
            Ok(_) => return deny("invalid credentials"),
            Err(e) => {
                tracing::warn!(%e, "user lookup failed");
                return deny("lookup failure");
            }
        };

        let user = User::from_node(&nodes[0].to_node());
        let token = match self.tokener.new_token(&user.id) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(%e, "token issue failed");
                return deny("token failure");
            }
        };

        nodes.push(NodeEdge {
            id: String::new(),
            typ: node_type::JWT.to_string(),
            parent: String::new(),
            points: vec![Point::new_text(Utc::now(), point_type::TOKEN, &token)],
            edge_points: Vec::new(),
        });

        self.bus.respond(msg, encode_nodes_reply(&nodes, ""));
    }
}
