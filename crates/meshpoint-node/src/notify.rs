//! Notification and message fan-out.
//!
//! Both walks share a shape: collect matching descendants, then climb
//! the parent edges and repeat at every ancestor, so a user (or a
//! message service) placed anywhere around the source is discovered.
//! At the first level only the parent the record arrived via is
//! followed — a user in several groups would otherwise be notified
//! once per group.

use std::collections::HashSet;

use meshpoint_bus::subject;
use meshpoint_proto::encode_message;
use meshpoint_storage::StoreEngine;
use meshpoint_types::node::{dedup_by_id, ROOT_PARENT};
use meshpoint_types::{
    node_type, point_value, Message, MsgService, NodeEdge, Notification, Result, User,
};

use crate::service::StoreService;

// ---------------------------------------------------------------------------
// MsgGateway
// ---------------------------------------------------------------------------

/// Outbound delivery seam.
///
/// The core decides *which* service delivers a message and over what
/// channel; the actual twilio/smtp calls live behind this trait.
pub trait MsgGateway: Send + Sync {
    /// Sends an SMS through the given service.
    fn send_sms(&self, service: &MsgService, to: &str, body: &str) -> Result<()>;

    /// Sends an email through the given service.
    fn send_email(&self, service: &MsgService, to: &str, subject: &str, body: &str)
        -> Result<()>;
}

/// Default gateway: logs deliveries instead of sending them.
pub struct LogGateway;

impl MsgGateway for LogGateway {
    fn send_sms(&self, service: &MsgService, to: &str, body: &str) -> Result<()> {
        tracing::info!(service = %service.id, %to, %body, "sms (log gateway)");
        Ok(())
    }

    fn send_email(
        &self,
        service: &MsgService,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<()> {
        tracing::info!(service = %service.id, %to, %subject, %body, "email (log gateway)");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notification fan-out (node.<id>.not)
// ---------------------------------------------------------------------------

/// Resolves a notification to target users and publishes one rendered
/// [`Message`] per user on `node.<userID>.msg`.
pub(crate) fn handle_notification(
    svc: &StoreService,
    node_id: &str,
    not: &Notification,
) -> Result<()> {
    let store = svc.store();
    let node = store.node(node_id)?;

    let users = if node.typ == node_type::USER {
        // notifying a user directly targets only that user
        vec![node.to_node_edge(&not.parent, Vec::new())]
    } else {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        collect_walk(
            store,
            node_id,
            node_type::USER,
            Some(&not.parent),
            &mut out,
            &mut visited,
        )?;
        out
    };

    for user_node in dedup_by_id(users) {
        let user = User::from_node(&user_node.to_node());
        if user.email.is_empty() && user.phone.is_empty() {
            continue;
        }

        let msg = Message {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            parent_id: user_node.parent.clone(),
            notification_id: node_id.to_string(),
            email: user.email,
            phone: user.phone,
            subject: not.subject.clone(),
            message: not.message.clone(),
        };

        let publish = svc
            .bus()
            .publish(&subject::node_msg(&user.id), encode_message(&msg));
        if let Err(e) = publish {
            tracing::error!(user = %user.id, %e, "failed to publish message");
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Message delivery (node.<id>.msg)
// ---------------------------------------------------------------------------

/// Finds the message services around a user and hands the message to
/// the gateway over the matching channel.
pub(crate) fn deliver_message(svc: &StoreService, node_id: &str, msg: &Message) -> Result<()> {
    let store = svc.store();

    let mut services = Vec::new();
    let mut visited = HashSet::new();
    collect_walk(
        store,
        node_id,
        node_type::MSG_SERVICE,
        Some(&msg.parent_id),
        &mut services,
        &mut visited,
    )?;

    for svc_node in dedup_by_id(services) {
        let service = MsgService::from_node(&svc_node.to_node());
        let sent = match service.service.as_str() {
            point_value::TWILIO if !msg.phone.is_empty() => {
                svc.gateway().send_sms(&service, &msg.phone, &msg.message)
            }
            point_value::SMTP if !msg.email.is_empty() => {
                svc.gateway()
                    .send_email(&service, &msg.email, &msg.subject, &msg.message)
            }
            _ => Ok(()),
        };
        if let Err(e) = sent {
            tracing::error!(service = %service.id, user = %msg.user_id, %e, "outbound delivery failed");
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Shared dual-direction walk
// ---------------------------------------------------------------------------

/// Collects `node_type`-typed descendants of `id`, then recurses
/// upward repeating the collection at each ancestor.
///
/// `first_parent` restricts the first upward step to the edge the
/// record arrived via; ancestors follow all their parents. The
/// visited set spans the whole walk, so diamond-shaped group graphs
/// terminate.
fn collect_walk(
    store: &StoreEngine,
    id: &str,
    typ: &str,
    first_parent: Option<&str>,
    out: &mut Vec<NodeEdge>,
    visited: &mut HashSet<String>,
) -> Result<()> {
    if !visited.insert(id.to_string()) {
        return Ok(());
    }

    out.extend(store.descendants(id, typ, true, false)?);

    let parents: Vec<String> = match first_parent {
        Some(p) if !p.is_empty() => vec![p.to_string()],
        _ => store
            .edges_up(id, false)?
            .into_iter()
            .map(|e| e.up)
            .collect(),
    };

    for parent in parents {
        if parent == ROOT_PARENT {
            continue;
        }
        collect_walk(store, &parent, typ, None, out, visited)?;
    }

    Ok(())
}
